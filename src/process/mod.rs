//! Child process supervision.
//!
//! One [`ProcessSupervisor`] wraps exactly one child process: start it, stream
//! its output as events, wait for it with cancellation, and make sure it is
//! gone when the supervisor is disposed.

pub mod shell;
pub mod supervisor;

pub use shell::{ShellLaunch, system_dir};
pub use supervisor::{ProcessEvent, ProcessSupervisor};

/// Errors from [`ProcessSupervisor`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process is already started. Create a new supervisor to start another process.")]
    AlreadyStarted,

    #[error("Process has not been started.")]
    NotStarted,

    #[error("Process supervisor has been disposed.")]
    Disposed,

    #[error("Failed to start process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Waiting for the process was cancelled.")]
    Cancelled,
}
