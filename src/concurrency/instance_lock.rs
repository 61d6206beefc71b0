//! Application single-instance lock using advisory file locking (fs2 flock).
//!
//! Only the long-running `serve` command takes it, so a second instance can
//! report "already running" instead of failing on the fixed proxy port.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

/// Advisory lock file in the runtime directory (state directory fallback).
#[derive(Debug, Clone)]
pub struct InstanceLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
pub struct InstanceLockGuard {
    file: File,
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl InstanceLock {
    pub fn new(paths: &Paths) -> Result<Self> {
        Self::at(paths.instance_lock())
    }

    pub fn at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking acquire. Returns `None` if another instance holds it.
    ///
    /// The holder's pid is written into the file for diagnostics.
    pub fn try_acquire(&self) -> Result<Option<InstanceLockGuard>> {
        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(InstanceLockGuard { file }))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            #[cfg(unix)]
            Err(ref e) if e.raw_os_error() == Some(35) || e.raw_os_error() == Some(11) => {
                // EAGAIN(11) / EWOULDBLOCK(35 on macOS)
                Ok(None)
            }
            #[cfg(windows)]
            Err(ref e) if e.raw_os_error() == Some(33) => {
                // ERROR_LOCK_VIOLATION
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
