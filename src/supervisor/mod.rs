//! Session Worker Supervisor
//!
//! Spawns one graph-hosting process per channel, enforces the worker limit,
//! hands out control ports and reaps idle or orphaned workers.
//!
//! ```text
//! control ──start/stop/ping/list──▶ WorkerSupervisor ──▶ Worker ──▶ child process group
//!                                        │                  └── [channel] lines ──▶ app-*.log
//!                                        └── sweep every N s: reap idle + orphaned workers
//! ```

mod log_sink;
mod manager;
mod ports;
mod property;
pub mod types;
mod worker;

pub use log_sink::{log_path, LogSink};
pub use manager::WorkerSupervisor;
pub use ports::PortAllocator;
pub use property::{JsonPropertyWriter, PropertyWriter};
pub use types::{
    IdleTimeout, PingRequest, StartRequest, StopRequest, SupervisorConfig, WorkerInfo,
};
pub use worker::{LaunchCommand, Worker, CONTROL_PORT_ENV};
