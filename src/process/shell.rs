//! Shell wrapper used to start a program and block until it exits.

use std::path::{Path, PathBuf};

/// Program plus arguments, ready for [`super::ProcessSupervisor::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ShellLaunch {
    /// `cmd.exe /c start /wait "" <target> <argument>`
    ///
    /// `start` returns immediately for GUI programs; `/wait` keeps `cmd.exe`
    /// alive until `target` exits, so supervising `cmd.exe` tracks the session.
    /// The empty argument is the window title `start` expects before a quoted
    /// path.
    pub fn start_and_wait(system_dir: &Path, target: &Path, argument: &Path) -> Self {
        Self {
            program: system_dir.join("cmd.exe"),
            args: vec![
                "/c".to_string(),
                "start".to_string(),
                "/wait".to_string(),
                String::new(),
                target.to_string_lossy().into_owned(),
                argument.to_string_lossy().into_owned(),
            ],
        }
    }
}

/// Windows system directory (`%SystemRoot%\System32`).
pub fn system_dir() -> PathBuf {
    let root = std::env::var_os("SystemRoot")
        .or_else(|| std::env::var_os("windir"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
    root.join("System32")
}
