// src/lib.rs
// graph-host - extension concurrency runtime and session worker supervisor

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod control;
pub mod error;
pub mod runtime;
pub mod supervisor;

pub use error::{GraphHostError, Result};
