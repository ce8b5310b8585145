// src/runtime/fatal.rs
// Unhandled extension failures terminate the whole process

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::Write;

use tracing::error;

/// An error or panic that escaped an extension handler
#[derive(Debug, Clone)]
pub struct FatalError {
    pub extension: String,
    /// Lifecycle stage or message kind that was running
    pub during: String,
    pub message: String,
    /// Backtrace captured where the error was created, when backtraces are
    /// enabled (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`). Panics report their
    /// location through the panic hook instead.
    pub origin: Option<String>,
}

impl FatalError {
    pub fn from_error(extension: &str, during: &str, err: &anyhow::Error) -> Self {
        let backtrace = err.backtrace();
        Self {
            extension: extension.to_string(),
            during: during.to_string(),
            message: format!("{err:#}"),
            origin: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
        }
    }

    pub fn from_panic(extension: &str, during: &str, payload: &(dyn Any + Send)) -> Self {
        Self {
            extension: extension.to_string(),
            during: during.to_string(),
            message: panic_message(payload),
            origin: None,
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "extension {} failed during {}: {}",
            self.extension, self.during, self.message
        )
    }
}

/// Decides what happens when an extension handler fails
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, error: FatalError);
}

/// Logs the error with a backtrace, flushes output and exits with status 1.
///
/// Extension state inside a shared media pipeline cannot be recovered once a
/// handler has failed, so nothing is resumed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortProcess;

impl FatalHandler for AbortProcess {
    fn on_fatal(&self, err: FatalError) {
        error!(
            extension = %err.extension,
            during = %err.during,
            error = %err.message,
            "Unhandled error in extension handler, terminating process"
        );

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "fatal: {err}");
        match &err.origin {
            Some(origin) => {
                let _ = writeln!(stderr, "error backtrace:\n{origin}");
            }
            None => {
                let _ = writeln!(stderr, "handler backtrace:\n{}", Backtrace::force_capture());
            }
        }
        let _ = stderr.flush();
        let _ = std::io::stdout().lock().flush();

        std::process::exit(1);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}
