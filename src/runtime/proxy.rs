// src/runtime/proxy.rs
// Extension Lifecycle Proxy: bridges synchronous host calls onto a scheduler
//
// Every entry point validates the lifecycle, schedules the extension's async
// handler and returns. Completion is reported through the HostEnv `*_done`
// callbacks. Deinit completion is withheld until every message handler that
// was admitted has finished.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::extension::{Extension, ExtensionContext};
use super::fatal::{AbortProcess, FatalError, FatalHandler};
use super::host::{signal_done, HostEnv};
use super::lifecycle::{LifecycleStage, LifecycleState};
use super::message::{AudioFrame, Cmd, Data, Message, VideoFrame};
use super::scheduler::{SchedulerHandle, SchedulingMode, SharedScheduler};
use crate::error::{GraphHostError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Lifecycle {
    state: LifecycleState,
    pending: Option<LifecycleStage>,
}

struct ProxyInner {
    name: Arc<str>,
    mode: SchedulingMode,
    extension: Arc<dyn Extension>,
    host: Arc<dyn HostEnv>,
    fatal: Arc<dyn FatalHandler>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    lifecycle: Mutex<Lifecycle>,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// Decrements the in-flight count when a message handler ends, however it ends
struct InFlightGuard {
    inner: Arc<ProxyInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_one();
        }
    }
}

impl ProxyInner {
    fn context(&self) -> ExtensionContext {
        ExtensionContext::new(Arc::clone(&self.name), Arc::clone(&self.host))
    }

    fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match lock(&self.scheduler).as_ref() {
            Some(scheduler) => scheduler.schedule(task),
            None => Err(GraphHostError::SchedulerClosed),
        }
    }

    fn begin_stage(&self, stage: LifecycleStage) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if let Some(pending) = lifecycle.pending {
            return Err(GraphHostError::Lifecycle {
                extension: self.name.to_string(),
                expected: stage.requires().as_str(),
                actual: pending.in_progress(),
            });
        }
        if lifecycle.state != stage.requires() {
            return Err(GraphHostError::Lifecycle {
                extension: self.name.to_string(),
                expected: stage.requires().as_str(),
                actual: lifecycle.state.as_str(),
            });
        }
        lifecycle.pending = Some(stage);
        Ok(())
    }

    fn abandon_stage(&self, stage: LifecycleStage) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.pending == Some(stage) {
            lifecycle.pending = None;
        }
    }

    fn admit(self: &Arc<Self>, message: &Message) -> Result<InFlightGuard> {
        let lifecycle = lock(&self.lifecycle);
        if !lifecycle.state.accepts_messages() {
            return Err(GraphHostError::NotStarted {
                extension: self.name.to_string(),
                state: lifecycle.state.as_str(),
            });
        }
        // Counted under the lifecycle lock so deinit cannot miss it.
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        debug!(extension = %self.name, kind = message.kind(), name = message.name(), "Dispatching message");
        Ok(InFlightGuard {
            inner: Arc::clone(self),
        })
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn fail(&self, error: FatalError) {
        self.fatal.on_fatal(error);
    }

    async fn drive_stage(self: Arc<Self>, stage: LifecycleStage) {
        let ctx = self.context();
        let extension = Arc::clone(&self.extension);

        let handler = async move {
            match stage {
                LifecycleStage::Configure => extension.on_configure(&ctx).await,
                LifecycleStage::Init => extension.on_init(&ctx).await,
                LifecycleStage::Start => extension.on_start(&ctx).await,
                LifecycleStage::Stop => extension.on_stop(&ctx).await,
                LifecycleStage::Deinit => extension.on_deinit(&ctx).await,
            }
        };

        let outcome = AssertUnwindSafe(handler).catch_unwind().await;
        if let Some(error) = failure(&self.name, stage.as_str(), outcome) {
            self.fail(error);
            return;
        }

        if stage == LifecycleStage::Deinit {
            let pending = self.in_flight.load(Ordering::Acquire);
            if pending > 0 {
                debug!(extension = %self.name, pending, "Deinit waiting for message handlers");
            }
            self.wait_drained().await;
        }

        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.state = stage.completes();
            lifecycle.pending = None;
        }

        debug!(extension = %self.name, state = stage.completes().as_str(), "Lifecycle stage done");
        signal_done(self.host.as_ref(), stage);
    }

    async fn drive_message(self: Arc<Self>, message: Message, _guard: InFlightGuard) {
        let ctx = self.context();
        let extension = Arc::clone(&self.extension);
        let kind = message.kind();

        let handler = async move {
            match message {
                Message::Cmd(cmd) => extension.on_cmd(&ctx, cmd).await,
                Message::Data(data) => extension.on_data(&ctx, data).await,
                Message::AudioFrame(frame) => extension.on_audio_frame(&ctx, frame).await,
                Message::VideoFrame(frame) => extension.on_video_frame(&ctx, frame).await,
            }
        };

        let outcome = AssertUnwindSafe(handler).catch_unwind().await;
        if let Some(error) = failure(&self.name, kind, outcome) {
            self.fail(error);
        }
    }
}

fn failure(
    extension: &str,
    during: &str,
    outcome: std::result::Result<anyhow::Result<()>, Box<dyn std::any::Any + Send>>,
) -> Option<FatalError> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(FatalError::from_error(extension, during, &e)),
        Err(payload) => Some(FatalError::from_panic(extension, during, payload.as_ref())),
    }
}

/// One extension instance as seen by the native host.
///
/// Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct ExtensionProxy {
    inner: Arc<ProxyInner>,
}

impl ExtensionProxy {
    pub fn new(
        name: impl Into<String>,
        extension: Arc<dyn Extension>,
        host: Arc<dyn HostEnv>,
        scheduler: SchedulerHandle,
        fatal: Arc<dyn FatalHandler>,
    ) -> Self {
        let name: String = name.into();
        let mode = scheduler.mode();
        debug!(extension = %name, mode = mode.as_str(), "Extension proxy created");

        Self {
            inner: Arc::new(ProxyInner {
                name: Arc::from(name),
                mode,
                extension,
                host,
                fatal,
                scheduler: Mutex::new(Some(scheduler)),
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Unconfigured,
                    pending: None,
                }),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Bind to the process-wide shared scheduler or a new dedicated one,
    /// terminating the process on handler failure.
    pub fn attach(
        name: impl Into<String>,
        extension: Arc<dyn Extension>,
        host: Arc<dyn HostEnv>,
        mode: SchedulingMode,
    ) -> Result<Self> {
        let name: String = name.into();
        let shared = SharedScheduler::global();
        let scheduler = mode.attach(&name, &shared, shared.config())?;
        Ok(Self::new(name, extension, host, scheduler, Arc::new(AbortProcess)))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mode(&self) -> SchedulingMode {
        self.inner.mode
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.inner.lifecycle).state
    }

    /// Message handlers admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn on_configure(&self) -> Result<()> {
        self.run_stage(LifecycleStage::Configure)
    }

    pub fn on_init(&self) -> Result<()> {
        self.run_stage(LifecycleStage::Init)
    }

    pub fn on_start(&self) -> Result<()> {
        self.run_stage(LifecycleStage::Start)
    }

    pub fn on_stop(&self) -> Result<()> {
        self.run_stage(LifecycleStage::Stop)
    }

    pub fn on_deinit(&self) -> Result<()> {
        self.run_stage(LifecycleStage::Deinit)
    }

    pub fn on_cmd(&self, cmd: Cmd) -> Result<()> {
        self.on_message(Message::Cmd(cmd))
    }

    pub fn on_data(&self, data: Data) -> Result<()> {
        self.on_message(Message::Data(data))
    }

    pub fn on_audio_frame(&self, frame: AudioFrame) -> Result<()> {
        self.on_message(Message::AudioFrame(frame))
    }

    pub fn on_video_frame(&self, frame: VideoFrame) -> Result<()> {
        self.on_message(Message::VideoFrame(frame))
    }

    pub fn on_message(&self, message: Message) -> Result<()> {
        let guard = self.inner.admit(&message)?;
        let inner = Arc::clone(&self.inner);
        // On failure the future is dropped with the guard inside it.
        self.inner
            .schedule(async move { inner.drive_message(message, guard).await })
    }

    /// Release the scheduler. Work still queued gets the drain grace, then is
    /// cancelled.
    pub fn close(&self) {
        let state = self.state();
        if state != LifecycleState::Deinitialized {
            warn!(extension = %self.inner.name, state = state.as_str(), "Closing extension before deinit completed");
        }

        let scheduler = lock(&self.inner.scheduler).take();
        if let Some(scheduler) = scheduler {
            scheduler.detach();
        }
    }

    fn run_stage(&self, stage: LifecycleStage) -> Result<()> {
        self.inner.begin_stage(stage)?;

        let inner = Arc::clone(&self.inner);
        if let Err(e) = self
            .inner
            .schedule(async move { inner.drive_stage(stage).await })
        {
            self.inner.abandon_stage(stage);
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExtensionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionProxy")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
