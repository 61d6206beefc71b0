//! Local reverse proxy in front of the control-plane server.
//!
//! The control-plane server binds an ephemeral port; [`ProxyHost`] exposes it
//! on a fixed, well-known loopback port so in-sandbox clients have a stable
//! address.

mod forward;
mod host;

pub use host::{ProxyHost, ProxyInstance};

use serde::Serialize;
use std::fmt;

/// Lifecycle of the proxy listener.
///
/// `NotStarted → Starting → {Started | Failed}`, `Failed → Starting` on retry,
/// and `Stopped` once the host is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProxyState {
    NotStarted,
    Starting,
    Started,
    Failed,
    Stopped,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyState::NotStarted => "not started",
            ProxyState::Starting => "starting",
            ProxyState::Started => "started",
            ProxyState::Failed => "failed",
            ProxyState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot of the proxy host. Replaced as a whole on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyStatus {
    pub state: ProxyState,
    pub last_error: Option<String>,
    /// Well-known port, or the port actually bound once started.
    pub port: u16,
}

impl ProxyStatus {
    pub fn new(port: u16) -> Self {
        Self {
            state: ProxyState::NotStarted,
            last_error: None,
            port,
        }
    }
}
