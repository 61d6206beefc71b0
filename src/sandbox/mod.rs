//! Windows Sandbox orchestration.
//!
//! A launch composes a fresh `.wsb` profile plus a logon bootstrap script from
//! the user's launch settings, then starts the OS isolation host on that
//! profile and waits for the session to end.
//!
//! - [`mapping`]: host → guest folder mappings, deduplicated by guest path
//! - [`composer`]: profile + bootstrap script generation
//! - [`launcher`]: single-session check, composition, host start and wait

pub mod bootstrap;
pub mod composer;
pub mod detect;
pub mod launcher;
pub mod mapping;
pub mod profile;

use std::path::PathBuf;

use crate::process::ProcessError;

pub use composer::{AppLocations, ProfileComposer};
pub use detect::{
    ISOLATION_HOST_PROCESSES, ProcessLister, SystemProcessLister, find_isolation_session,
};
pub use launcher::{ISOLATION_HOST_EXE, SandboxLauncher};
pub use mapping::{FolderMapping, MountSet, SANDBOX_DESKTOP};
pub use profile::{IsolationProfile, Toggle};

/// Errors from composing or launching a sandbox session.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Only one Windows Sandbox session is allowed at a time ('{0}' is running).")]
    SessionAlreadyRunning(String),

    #[error("Cannot determine the application executable path.")]
    ExecutableUnknown,

    #[error("Cannot determine the application data directory.")]
    DataDirUnknown,

    #[error("Cannot create a folder mapping for '{}'.", .0.display())]
    MappingUnavailable(PathBuf),

    #[error("Windows Sandbox is only available on Windows.")]
    UnsupportedPlatform,

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Sandbox launch was cancelled.")]
    Cancelled,
}

impl SandboxError {
    /// Cancellation is reported separately from failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SandboxError::Cancelled | SandboxError::Process(ProcessError::Cancelled)
        )
    }
}
