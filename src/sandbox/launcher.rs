use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SandboxError;
use super::composer::ProfileComposer;
use super::detect::{ProcessLister, SystemProcessLister, find_isolation_session};
use crate::config::{Config, LaunchSettings, SettingsStore};
use crate::process::{ProcessError, ProcessEvent, ProcessSupervisor, ShellLaunch, system_dir};

/// Isolation host binary in the system directory.
pub const ISOLATION_HOST_EXE: &str = "WindowsSandbox.exe";

/// Runs one sandbox session at a time.
pub struct SandboxLauncher<P = SystemProcessLister> {
    settings: SettingsStore,
    composer: ProfileComposer,
    processes: P,
    system_dir: PathBuf,
    host_supported: bool,
}

impl SandboxLauncher<SystemProcessLister> {
    pub fn from_config(config: &Config) -> Result<Self, SandboxError> {
        Ok(Self::new(
            SettingsStore::new(config.paths.settings_file()),
            ProfileComposer::from_config(config)?,
            SystemProcessLister,
        ))
    }
}

impl<P: ProcessLister> SandboxLauncher<P> {
    pub fn new(settings: SettingsStore, composer: ProfileComposer, processes: P) -> Self {
        Self {
            settings,
            composer,
            processes,
            system_dir: system_dir(),
            host_supported: cfg!(windows),
        }
    }

    pub fn with_system_dir(mut self, dir: PathBuf) -> Self {
        self.system_dir = dir;
        self
    }

    /// `<system dir>\WindowsSandbox.exe`
    pub fn host_executable(&self) -> PathBuf {
        self.system_dir.join(ISOLATION_HOST_EXE)
    }

    /// Launch a session and wait for it to end, returning the warnings
    /// collected while composing the profile.
    ///
    /// `settings` of `None` uses the persisted launch settings.
    pub async fn launch(
        &self,
        settings: Option<LaunchSettings>,
        target_uri: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SandboxError> {
        let mut warnings = Vec::new();
        self.launch_collecting(settings, target_uri, &mut warnings, cancel)
            .await?;
        Ok(warnings)
    }

    /// Like [`launch`](Self::launch), but warnings stay available to the
    /// caller when the launch fails.
    pub async fn launch_collecting(
        &self,
        settings: Option<LaunchSettings>,
        target_uri: Option<&str>,
        warnings: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        // Must happen before anything touches the data directory.
        if let Some(name) = find_isolation_session(&self.processes).await {
            return Err(SandboxError::SessionAlreadyRunning(name));
        }

        let settings = match settings {
            Some(settings) => settings,
            None => self.settings.load().await,
        };

        let profile = self.composer.compose(&settings, warnings, target_uri).await?;

        if !self.host_supported {
            return Err(SandboxError::UnsupportedPlatform);
        }

        let host = self.host_executable();
        let shell = ShellLaunch::start_and_wait(&self.system_dir, &host, &profile);

        let supervisor = ProcessSupervisor::new();
        let log_task = log_process_output(&supervisor);

        let result: Result<i32, ProcessError> = async {
            let pid = supervisor.start(&shell.program, &shell.args, None)?;
            info!(pid, host = %host.display(), profile = %profile.display(), "Sandbox started");
            supervisor.wait_for_exit(cancel).await
        }
        .await;

        supervisor.dispose().await;
        log_task.abort();

        match result {
            Ok(code) => {
                info!(code, "Sandbox session ended");
                Ok(())
            }
            Err(ProcessError::Cancelled) => Err(SandboxError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }
}

fn log_process_output(supervisor: &ProcessSupervisor) -> tokio::task::JoinHandle<()> {
    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ProcessEvent::Stdout(line) => debug!(target: "tablecloth::sandbox::host", "{}", line),
                ProcessEvent::Stderr(line) => debug!(target: "tablecloth::sandbox::host", "stderr: {}", line),
                ProcessEvent::Exited(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;
    use crate::sandbox::AppLocations;
    use crate::sandbox::detect::tests::FakeProcesses;
    use std::time::Duration;

    struct Fixture {
        tmp: tempfile::TempDir,
        paths: Paths,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("app")).unwrap();
        let paths = Paths::rooted_at(tmp.path());
        Fixture { tmp, paths }
    }

    fn launcher(fx: &Fixture, running: Vec<&'static str>) -> SandboxLauncher<FakeProcesses> {
        let app = AppLocations::from_exe(fx.tmp.path().join("app").join("tablecloth.exe")).unwrap();
        let composer = ProfileComposer::new(app, fx.paths.clone())
            .with_runtime_dir(None)
            .with_credential_store_dir(Some(fx.tmp.path().join("no-npki")));
        SandboxLauncher::new(
            SettingsStore::new(fx.paths.settings_file()),
            composer,
            FakeProcesses(running),
        )
        .with_system_dir(fx.tmp.path().join("system32"))
    }

    #[tokio::test]
    async fn running_session_blocks_launch_before_any_write() {
        let fx = fixture();
        std::fs::create_dir_all(&fx.paths.data_dir).unwrap();
        let profile = fx.paths.sandbox_profile();
        std::fs::write(&profile, "previous").unwrap();
        let before = std::fs::metadata(&profile).unwrap().modified().unwrap();

        let launcher = launcher(&fx, vec!["explorer", "windowssandboxremotesession"]);
        let err = launcher
            .launch(Some(LaunchSettings::default()), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::SessionAlreadyRunning(_)));
        assert_eq!(std::fs::read_to_string(&profile).unwrap(), "previous");
        assert_eq!(std::fs::metadata(&profile).unwrap().modified().unwrap(), before);
        assert!(!fx.paths.bootstrap_script().exists());
    }

    #[tokio::test]
    async fn host_path_comes_from_system_dir() {
        let fx = fixture();
        let launcher = launcher(&fx, vec![]);
        assert_eq!(
            launcher.host_executable(),
            fx.tmp.path().join("system32").join("WindowsSandbox.exe")
        );
    }

    #[tokio::test]
    async fn unsupported_host_still_reports_warnings() {
        let fx = fixture();
        let mut launcher = launcher(&fx, vec![]);
        launcher.host_supported = false;

        let mut warnings = Vec::new();
        let err = launcher
            .launch_collecting(None, None, &mut warnings, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::UnsupportedPlatform));
        // Persisted defaults mount the (missing) credential store.
        assert_eq!(warnings.len(), 1);
        assert!(fx.paths.sandbox_profile().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_waits_for_shell_and_returns_warnings() {
        let fx = fixture();
        let system = fx.tmp.path().join("system32");
        std::fs::create_dir_all(&system).unwrap();
        let true_bin = ["/bin/true", "/usr/bin/true"]
            .into_iter()
            .map(std::path::Path::new)
            .find(|p| p.exists())
            .unwrap();
        std::os::unix::fs::symlink(true_bin, system.join("cmd.exe")).unwrap();

        let mut launcher = launcher(&fx, vec!["explorer"]);
        launcher.host_supported = true;

        let store = SettingsStore::new(fx.paths.settings_file());
        let mut saved = LaunchSettings::default();
        saved.mount_credential_store = false;
        saved.mount_specific_folders = true;
        saved.folders = vec![fx.tmp.path().join("gone").to_string_lossy().into_owned()];
        store.save(&saved).await.unwrap();

        let warnings = launcher
            .launch(None, Some("https://bank.example"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("gone"));
        let script = std::fs::read_to_string(fx.paths.bootstrap_script()).unwrap();
        assert!(script.contains("--targetUri=https://bank.example"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelling_a_launch_stops_the_session() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let system = fx.tmp.path().join("system32");
        std::fs::create_dir_all(&system).unwrap();
        let shell = system.join("cmd.exe");
        std::fs::write(&shell, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&shell, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut launcher = launcher(&fx, vec![]);
        launcher.host_supported = true;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let settings = LaunchSettings {
            mount_credential_store: false,
            ..LaunchSettings::default()
        };
        let err = launcher
            .launch(Some(settings), None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Cancelled), "{:?}", err);
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        assert!(SandboxError::Cancelled.is_cancelled());
        assert!(SandboxError::Process(ProcessError::Cancelled).is_cancelled());
        assert!(!SandboxError::UnsupportedPlatform.is_cancelled());
    }
}
