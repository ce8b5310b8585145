// src/runtime/host.rs
// Synchronous callbacks back into the native host

use super::lifecycle::LifecycleStage;

/// The host side of an extension's lifecycle.
///
/// Each lifecycle entry point on [`ExtensionProxy`](super::ExtensionProxy)
/// returns immediately; the matching `*_done` callback fires once the
/// extension's async handler has finished. Callbacks run on the scheduler
/// thread and must not block.
pub trait HostEnv: Send + Sync {
    fn on_configure_done(&self);
    fn on_init_done(&self);
    fn on_start_done(&self);
    fn on_stop_done(&self);
    fn on_deinit_done(&self);
}

pub(crate) fn signal_done(host: &dyn HostEnv, stage: LifecycleStage) {
    match stage {
        LifecycleStage::Configure => host.on_configure_done(),
        LifecycleStage::Init => host.on_init_done(),
        LifecycleStage::Start => host.on_start_done(),
        LifecycleStage::Stop => host.on_stop_done(),
        LifecycleStage::Deinit => host.on_deinit_done(),
    }
}
