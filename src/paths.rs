//! Directory resolution for TableCloth.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. TableCloth-specific env var (TABLECLOTH_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, %APPDATA%, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// File name of the generated isolation profile.
pub const SANDBOX_PROFILE_FILE: &str = "TableCloth.wsb";

/// File name of the logon bootstrap script.
pub const BOOTSTRAP_SCRIPT_FILE: &str = "Launch.ps1";

/// Resolved directory paths for the entire application.
///
/// Created once at startup, threaded through Config.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// Per-user data directory. Mapped into every sandbox session; holds the
    /// launch settings, the generated profile and the bootstrap script.
    pub data_dir: PathBuf,

    /// State directory: instance lock fallback when there is no runtime dir
    pub state_dir: PathBuf,

    /// Runtime directory: instance lock.
    /// None if no suitable runtime directory is available.
    pub runtime_dir: Option<PathBuf>,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "TABLECLOTH_CONFIG_DIR", || {
            strategy.config_dir().join("tablecloth")
        });

        let data_dir = env_or(&env_fn, "TABLECLOTH_DATA_DIR", || {
            strategy.data_dir().join("tablecloth")
        });

        let state_dir = env_or(&env_fn, "TABLECLOTH_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("tablecloth")
        });

        let runtime_dir = resolve_runtime_dir(&env_fn);

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
            runtime_dir,
        })
    }

    /// Build a `Paths` rooted entirely under one directory.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            state_dir: root.join("state"),
            runtime_dir: Some(root.join("run")),
        }
    }

    // ── Convenience accessors for specific files ──

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Launch settings: data_dir/launcher.json
    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("launcher.json")
    }

    /// Generated isolation profile: data_dir/TableCloth.wsb
    pub fn sandbox_profile(&self) -> PathBuf {
        self.data_dir.join(SANDBOX_PROFILE_FILE)
    }

    /// Logon bootstrap script: data_dir/Launch.ps1
    pub fn bootstrap_script(&self) -> PathBuf {
        self.data_dir.join(BOOTSTRAP_SCRIPT_FILE)
    }

    /// Single-instance lock file (in runtime_dir, falls back to state_dir)
    pub fn instance_lock(&self) -> PathBuf {
        self.runtime_dir
            .as_ref()
            .unwrap_or(&self.state_dir)
            .join("tablecloth.lock")
    }

    /// Create all directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.state_dir] {
            create_dir_with_mode(dir)?;
        }

        if let Some(ref runtime) = self.runtime_dir {
            create_dir_with_mode(runtime)?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                config_dir: home.join(".config").join("tablecloth"),
                data_dir: home.join(".local").join("share").join("tablecloth"),
                state_dir: home.join(".local").join("state").join("tablecloth"),
                runtime_dir: None,
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

fn resolve_runtime_dir<F>(env_fn: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Some(path.join("tablecloth"));
        }
    }

    // Fallback: $TMPDIR/tablecloth-$UID on Unix
    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Some(PathBuf::from(tmpdir).join(format!("tablecloth-{}", uid)))
    }

    #[cfg(not(unix))]
    {
        env_fn("TEMP").ok().map(|t| {
            let user = env_fn("USERNAME").unwrap_or_else(|_| "user".into());
            PathBuf::from(t).join(format!("tablecloth-{}", user))
        })
    }
}

/// Create a directory with mode 0700 on Unix.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_end_with_app_name() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_dir.ends_with("tablecloth"));
        assert!(paths.data_dir.ends_with("tablecloth"));
        assert!(paths.state_dir.ends_with("tablecloth"));
    }

    #[test]
    fn env_vars_override_defaults() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("TABLECLOTH_CONFIG_DIR", "/custom/config");
        env.insert("TABLECLOTH_DATA_DIR", "/custom/data");
        env.insert("TABLECLOTH_STATE_DIR", "/custom/state");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
    }

    #[test]
    fn relative_and_empty_overrides_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("TABLECLOTH_CONFIG_DIR", "relative/path");
        env.insert("TABLECLOTH_DATA_DIR", "");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert_ne!(paths.config_dir, PathBuf::from("relative/path"));
        assert!(paths.data_dir.is_absolute());
    }

    #[test]
    fn file_accessors_live_in_data_dir() {
        let paths = Paths::rooted_at(Path::new("/srv/tc"));

        assert_eq!(paths.config_file(), PathBuf::from("/srv/tc/config/config.toml"));
        assert_eq!(paths.settings_file(), PathBuf::from("/srv/tc/data/launcher.json"));
        assert_eq!(
            paths.sandbox_profile(),
            PathBuf::from("/srv/tc/data/TableCloth.wsb")
        );
        assert_eq!(
            paths.bootstrap_script(),
            PathBuf::from("/srv/tc/data/Launch.ps1")
        );
        assert!(paths.instance_lock().ends_with("run/tablecloth.lock"));
    }
}
