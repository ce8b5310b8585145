//! Extension Concurrency Runtime
//!
//! Bridges synchronous lifecycle and message calls from the native host onto
//! async extension handlers.
//!
//! ```text
//! host thread ──on_start()──▶ ExtensionProxy ──schedule──▶ SchedulerHandle
//!      ▲                                                        │
//!      └────────────── on_start_done() ◀── handler finished ◀───┘
//! ```
//!
//! Extensions in `Shared` mode multiplex onto one reference-counted scheduler
//! thread; `Isolated` extensions each get a dedicated thread.
//!
//! # Usage
//!
//! ```rust,ignore
//! SharedScheduler::init_global(config.scheduler_config());
//! let registry = AddonRegistry::new();
//! registry.register("stt", SchedulingMode::Shared, |_| Arc::new(SpeechToText::default()))?;
//!
//! let proxy = registry.create_instance("stt", "stt_1", host)?;
//! proxy.on_configure()?;          // host.on_configure_done() fires later
//! ```

mod addon;
mod extension;
mod fatal;
mod host;
mod lifecycle;
mod message;
mod proxy;
mod scheduler;

pub use addon::AddonRegistry;
pub use extension::{Extension, ExtensionContext};
pub use fatal::{AbortProcess, FatalError, FatalHandler};
pub use host::HostEnv;
pub use lifecycle::{LifecycleStage, LifecycleState};
pub use message::{AudioFrame, Cmd, Data, Message, VideoFrame};
pub use proxy::ExtensionProxy;
pub use scheduler::{
    SchedulerConfig, SchedulerHandle, SchedulingMode, SharedScheduler, DEFAULT_DRAIN_GRACE,
};
