use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::proxy::ProxyState;

/// Server name in generated client configuration.
pub const CLIENT_SERVER_NAME: &str = "tablecloth";

/// Environment variable that tells the client where the proxy listens.
pub const PROXY_URL_ENV: &str = "TABLECLOTH_PROXY_URL";

/// Result of one status check. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerHealth {
    pub healthy: bool,
    pub control_plane_reachable: bool,
    pub proxy_reachable: bool,
    pub proxy_state: ProxyState,
    pub control_plane_port: Option<u16>,
    pub proxy_port: u16,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ServerHealth {
    /// One-line description for a status line.
    pub fn summary(&self) -> String {
        if self.healthy {
            let control = self
                .control_plane_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            return format!(
                "Control plane connected (port: {}, proxy: {})",
                control, self.proxy_port
            );
        }

        let mut parts = Vec::new();
        if !self.control_plane_reachable {
            parts.push("control plane unreachable".to_string());
        }
        if self.proxy_state == ProxyState::Starting {
            parts.push("proxy starting".to_string());
        } else if !self.proxy_reachable {
            parts.push("proxy unreachable".to_string());
        }
        if let Some(error) = &self.last_error {
            parts.push(format!("error: {}", error));
        }

        if parts.is_empty() {
            "control plane connection failed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Client configuration pointing a tool client at the proxy.
///
/// Only available once a healthy status has been observed.
pub fn client_config_json(health: Option<&ServerHealth>, install_dir: &Path) -> Result<String> {
    let Some(health) = health else {
        bail!("No server status is available yet");
    };
    if !health.healthy {
        bail!("Server is not healthy: {}", health.summary());
    }

    let entry = install_dir.join("mcp-server").join("dist").join("index.js");
    let config = json!({
        "mcpServers": {
            CLIENT_SERVER_NAME: {
                "command": "node",
                "args": [entry.to_string_lossy()],
                "env": {
                    PROXY_URL_ENV: format!("http://localhost:{}", health.proxy_port),
                },
            },
        },
    });

    Ok(serde_json::to_string_pretty(&config)?)
}
