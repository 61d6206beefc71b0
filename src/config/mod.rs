mod settings;

pub use settings::{LaunchSettings, SettingsStore};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::paths::Paths;

/// Fixed well-known port of the reverse proxy listener.
pub const DEFAULT_PROXY_PORT: u16 = 29400;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// TCP connect timeout for reachability probes, in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Shared runtime directory mapped into the sandbox when present.
    /// Default: %ProgramFiles%\dotnet
    #[serde(default)]
    pub runtime_dir: Option<String>,

    /// Certificate store directory mounted when the credential-store toggle is on.
    /// Default: %USERPROFILE%\AppData\LocalLow\NPKI
    #[serde(default)]
    pub credential_store_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}
fn default_probe_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_proxy_port(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths)
    }

    /// Load `config.toml` under the given paths, creating it from the
    /// template on first run.
    pub fn load_from(paths: Paths) -> Result<Self> {
        let path = paths.config_file();

        if !path.exists() {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.paths = paths;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        tracing::info!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["proxy", "bind"] => Ok(self.proxy.bind.clone()),
            ["proxy", "port"] => Ok(self.proxy.port.to_string()),
            ["status", "probe_timeout_ms"] => Ok(self.status.probe_timeout_ms.to_string()),
            ["sandbox", "runtime_dir"] => Ok(self.sandbox.runtime_dir.clone().unwrap_or_default()),
            ["sandbox", "credential_store_dir"] => Ok(self
                .sandbox
                .credential_store_dir
                .clone()
                .unwrap_or_default()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["proxy", "bind"] => self.proxy.bind = value.to_string(),
            ["proxy", "port"] => self.proxy.port = value.parse()?,
            ["status", "probe_timeout_ms"] => self.status.probe_timeout_ms = value.parse()?,
            ["sandbox", "runtime_dir"] => self.sandbox.runtime_dir = non_empty(value),
            ["sandbox", "credential_store_dir"] => {
                self.sandbox.credential_store_dir = non_empty(value)
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }

    /// Shared runtime directory override, with `~` and env vars expanded.
    pub fn runtime_dir_override(&self) -> Option<PathBuf> {
        self.sandbox.runtime_dir.as_deref().map(expand_path)
    }

    /// Credential store directory override, with `~` and env vars expanded.
    pub fn credential_store_override(&self) -> Option<PathBuf> {
        self.sandbox.credential_store_dir.as_deref().map(expand_path)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn expand_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::full(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(raw).into_owned());
    PathBuf::from(expanded)
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# TableCloth Configuration
# Auto-created on first run. Edit as needed.

[proxy]
# Local reverse proxy in front of the control-plane server
bind = "127.0.0.1"
port = 29400

[status]
# TCP connect timeout used by the health probes
probe_timeout_ms = 1000

# [sandbox]
# runtime_dir = "C:\\Program Files\\dotnet"                       # mapped when present
# credential_store_dir = "~\\AppData\\LocalLow\\NPKI"              # mounted on request

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.proxy.port, DEFAULT_PROXY_PORT);
        assert_eq!(config.proxy.bind, "127.0.0.1");
        assert_eq!(config.status.probe_timeout_ms, 1000);
        assert!(config.sandbox.runtime_dir.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_from_creates_template_on_first_run() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::rooted_at(tmp.path());

        let config = Config::load_from(paths.clone()).unwrap();
        assert!(paths.config_file().exists());
        assert_eq!(config.proxy.port, DEFAULT_PROXY_PORT);

        // Second load reads the file back
        let again = Config::load_from(paths).unwrap();
        assert_eq!(again.logging.level, "info");
    }

    #[test]
    fn set_then_get_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::rooted_at(tmp.path());

        let mut config = Config::load_from(paths.clone()).unwrap();
        config.set_value("proxy.port", "29500").unwrap();
        config.set_value("sandbox.runtime_dir", "/opt/runtime").unwrap();
        config.save().unwrap();

        let reloaded = Config::load_from(paths).unwrap();
        assert_eq!(reloaded.get_value("proxy.port").unwrap(), "29500");
        assert_eq!(
            reloaded.runtime_dir_override(),
            Some(PathBuf::from("/opt/runtime"))
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut config = Config::default();
        assert!(config.get_value("agent.model").is_err());
        assert!(config.set_value("proxy.port", "not-a-port").is_err());
        assert!(config.set_value("nope", "1").is_err());
    }
}
