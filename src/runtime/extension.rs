// src/runtime/extension.rs
// The async handler contract implemented by extension authors

use std::sync::Arc;

use async_trait::async_trait;

use super::host::HostEnv;
use super::message::{AudioFrame, Cmd, Data, VideoFrame};

/// What a handler can see about the instance it is running for
#[derive(Clone)]
pub struct ExtensionContext {
    name: Arc<str>,
    host: Arc<dyn HostEnv>,
}

impl ExtensionContext {
    pub(crate) fn new(name: Arc<str>, host: Arc<dyn HostEnv>) -> Self {
        Self { name, host }
    }

    /// Instance name from the graph
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Arc<dyn HostEnv> {
        &self.host
    }
}

/// Async extension logic.
///
/// Every handler defaults to a no-op so an extension only implements what it
/// needs. Returning an error (or panicking) from any handler is fatal for the
/// whole process.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    async fn on_configure(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_init(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_start(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_deinit(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_cmd(&self, _ctx: &ExtensionContext, _cmd: Cmd) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_data(&self, _ctx: &ExtensionContext, _data: Data) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_audio_frame(
        &self,
        _ctx: &ExtensionContext,
        _frame: AudioFrame,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_video_frame(
        &self,
        _ctx: &ExtensionContext,
        _frame: VideoFrame,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
