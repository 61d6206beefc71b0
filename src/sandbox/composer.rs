//! Builds the isolation profile and its bootstrap script for one launch.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::SandboxError;
use super::bootstrap::{BootstrapScript, logon_command};
use super::mapping::{FolderMapping, MountSet, folder_alias};
use super::profile::IsolationProfile;
use crate::config::{Config, LaunchSettings};
use crate::paths::{BOOTSTRAP_SCRIPT_FILE, Paths};

/// Where the running application lives.
///
/// Resolved once per composer so the mapped install directory and the binary
/// the bootstrap script starts always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLocations {
    pub exe_path: PathBuf,
    pub install_dir: PathBuf,
    pub exe_name: String,
}

impl AppLocations {
    /// Locations of the current executable.
    pub fn current() -> Result<Self, SandboxError> {
        let exe = std::env::current_exe().map_err(|_| SandboxError::ExecutableUnknown)?;
        Self::from_exe(exe)
    }

    pub fn from_exe(exe_path: PathBuf) -> Result<Self, SandboxError> {
        let install_dir = exe_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or(SandboxError::ExecutableUnknown)?;
        let exe_name = exe_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(SandboxError::ExecutableUnknown)?;

        Ok(Self {
            exe_path,
            install_dir,
            exe_name,
        })
    }
}

/// Composes profiles into the application's data directory.
#[derive(Debug, Clone)]
pub struct ProfileComposer {
    app: AppLocations,
    paths: Paths,
    runtime_dir: Option<PathBuf>,
    credential_store_dir: Option<PathBuf>,
}

impl ProfileComposer {
    pub fn new(app: AppLocations, paths: Paths) -> Self {
        Self {
            app,
            paths,
            runtime_dir: default_runtime_dir(),
            credential_store_dir: default_credential_store_dir(),
        }
    }

    /// Composer for the running executable, with directory overrides from
    /// `config.toml`.
    pub fn from_config(config: &Config) -> Result<Self, SandboxError> {
        let mut composer = Self::new(AppLocations::current()?, config.paths.clone());
        if let Some(dir) = config.runtime_dir_override() {
            composer.runtime_dir = Some(dir);
        }
        if let Some(dir) = config.credential_store_override() {
            composer.credential_store_dir = Some(dir);
        }
        Ok(composer)
    }

    pub fn with_runtime_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.runtime_dir = dir;
        self
    }

    pub fn with_credential_store_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.credential_store_dir = dir;
        self
    }

    /// Write the profile and bootstrap script for `settings` and return the
    /// profile path.
    ///
    /// Folders that cannot be mapped are reported through `warnings`. Failing
    /// to map the install or data directory, or to write either file, is fatal.
    pub async fn compose(
        &self,
        settings: &LaunchSettings,
        warnings: &mut Vec<String>,
        target_uri: Option<&str>,
    ) -> Result<PathBuf, SandboxError> {
        let data_dir = &self.paths.data_dir;
        if data_dir.as_os_str().is_empty() {
            return Err(SandboxError::DataDirUnknown);
        }
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| SandboxError::Io {
                path: data_dir.clone(),
                source,
            })?;

        let (profile, script) = self.build(settings, warnings, target_uri)?;

        let profile_path = self.paths.sandbox_profile();
        write_file(&profile_path, profile.to_xml()).await?;
        write_file(&self.paths.bootstrap_script(), script).await?;

        info!(
            path = %profile_path.display(),
            mappings = profile.mapped_folders.len(),
            warnings = warnings.len(),
            "Sandbox profile written"
        );
        Ok(profile_path)
    }

    /// Build the profile and script without touching the disk.
    pub fn build(
        &self,
        settings: &LaunchSettings,
        warnings: &mut Vec<String>,
        target_uri: Option<&str>,
    ) -> Result<(IsolationProfile, String), SandboxError> {
        let mut mounts = MountSet::new();

        let app_mapping = FolderMapping::new(&self.app.install_dir, None, None)
            .ok_or_else(|| SandboxError::MappingUnavailable(self.app.install_dir.clone()))?;
        let app_guest = app_mapping.guest_path.clone();
        mounts.insert(app_mapping);

        let mut data_mapping = FolderMapping::new(&self.paths.data_dir, None, None)
            .ok_or_else(|| SandboxError::MappingUnavailable(self.paths.data_dir.clone()))?;
        if data_mapping.guest_path.eq_ignore_ascii_case(&app_guest) {
            data_mapping.guest_path = format!("{}-data", data_mapping.guest_path);
            data_mapping.explicit_guest = true;
            debug!(guest = %data_mapping.guest_path, "Data directory renamed in the sandbox");
        }
        let data_guest = data_mapping.guest_path.clone();
        mounts.insert(data_mapping);

        let required = [app_guest.as_str(), data_guest.as_str()];

        let mut runtime_alias = None;
        if let Some(mapping) = self
            .runtime_dir
            .as_deref()
            .and_then(|dir| FolderMapping::new(dir, None, None))
        {
            debug!(path = %mapping.host_path.display(), "Mapping shared runtime");
            let alias = folder_alias(&mapping.host_path.to_string_lossy()).to_string();
            if insert_optional(&mut mounts, mapping, &required, warnings) {
                runtime_alias = Some(alias);
            }
        }

        if settings.mount_credential_store {
            match &self.credential_store_dir {
                Some(dir) => map_or_warn(&mut mounts, dir, &required, warnings),
                None => push_warning(
                    warnings,
                    "Cannot determine the credential store directory.".to_string(),
                ),
            }
        }

        if settings.mount_specific_folders {
            for folder in &settings.folders {
                map_or_warn(&mut mounts, &normalize_folder(folder), &required, warnings);
            }
        }

        let command = logon_command(&format!("{}\\{}", data_guest, BOOTSTRAP_SCRIPT_FILE));
        let profile = IsolationProfile::new(settings, mounts.into_vec(), command);

        let script = BootstrapScript {
            app_dir: &app_guest,
            exe_name: &self.app.exe_name,
            runtime_alias: runtime_alias.as_deref(),
            target_uri,
        }
        .render();

        Ok((profile, script))
    }
}

fn map_or_warn(mounts: &mut MountSet, dir: &Path, required: &[&str], warnings: &mut Vec<String>) {
    match FolderMapping::new(dir, None, None) {
        Some(mapping) => {
            insert_optional(mounts, mapping, required, warnings);
        }
        None => push_warning(
            warnings,
            format!("Selected directory '{}' does not exist.", dir.display()),
        ),
    }
}

/// Insert a mapping unless its guest path belongs to the install or data
/// directory. Returns whether it was inserted.
fn insert_optional(
    mounts: &mut MountSet,
    mapping: FolderMapping,
    required: &[&str],
    warnings: &mut Vec<String>,
) -> bool {
    if required
        .iter()
        .any(|guest| guest.eq_ignore_ascii_case(&mapping.guest_path))
    {
        push_warning(
            warnings,
            format!(
                "Directory '{}' was not mapped because '{}' is reserved for TableCloth.",
                mapping.host_path.display(),
                mapping.guest_path
            ),
        );
        return false;
    }

    if let Some(replaced) = mounts.insert(mapping) {
        debug!(
            path = %replaced.host_path.display(),
            guest = %replaced.guest_path,
            "Mapping replaced by a later folder"
        );
    }
    true
}

fn push_warning(warnings: &mut Vec<String>, message: String) {
    warn!("{}", message);
    warnings.push(message);
}

async fn write_file(path: &Path, contents: String) -> Result<(), SandboxError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| SandboxError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Expand `%VAR%`, `$VAR` and `~`, then make the path absolute.
fn normalize_folder(raw: &str) -> PathBuf {
    let expanded = expand_percent_vars(raw.trim());
    let expanded = shellexpand::full(&expanded)
        .map(|s| s.into_owned())
        .unwrap_or(expanded);
    let path = PathBuf::from(expanded);
    std::path::absolute(&path).unwrap_or(path)
}

/// Windows-style `%NAME%` expansion. Unknown names are left as written.
fn expand_percent_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// `%ProgramFiles%\dotnet`, when the variable is set.
fn default_runtime_dir() -> Option<PathBuf> {
    std::env::var_os("ProgramFiles").map(|dir| PathBuf::from(dir).join("dotnet"))
}

/// `<home>\AppData\LocalLow\NPKI`.
fn default_credential_store_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join("AppData")
            .join("LocalLow")
            .join("NPKI")
    })
}
