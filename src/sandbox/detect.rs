//! Detecting an isolation session that is already running.

use std::future::Future;
use std::io;

use tokio::process::Command;
use tracing::debug;

/// Host processes that indicate a live sandbox session.
pub const ISOLATION_HOST_PROCESSES: [&str; 3] = [
    "WindowsSandbox",
    "WindowsSandboxRemoteSession",
    "WindowsSandboxServer",
];

/// Source of the names of processes running on this machine.
pub trait ProcessLister: Send + Sync {
    /// Process image names without directory or `.exe` suffix.
    fn process_names(&self) -> impl Future<Output = io::Result<Vec<String>>> + Send;
}

/// Lists processes with the platform's own tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessLister;

impl ProcessLister for SystemProcessLister {
    async fn process_names(&self) -> io::Result<Vec<String>> {
        #[cfg(windows)]
        {
            let output = Command::new("tasklist")
                .args(["/FO", "CSV", "/NH"])
                .output()
                .await?;
            Ok(parse_tasklist_csv(&String::from_utf8_lossy(&output.stdout)))
        }

        #[cfg(not(windows))]
        {
            let output = Command::new("ps").args(["-A", "-o", "comm="]).output().await?;
            Ok(parse_ps(&String::from_utf8_lossy(&output.stdout)))
        }
    }
}

/// Returns the name of the first running isolation host process, if any.
///
/// Names compare case-insensitively. A listing failure counts as "none
/// running"; the check is advisory.
pub async fn find_isolation_session<P: ProcessLister>(lister: &P) -> Option<String> {
    let names = match lister.process_names().await {
        Ok(names) => names,
        Err(e) => {
            debug!("Could not list processes: {}", e);
            return None;
        }
    };

    names.into_iter().find(|name| {
        ISOLATION_HOST_PROCESSES
            .iter()
            .any(|host| host.eq_ignore_ascii_case(name))
    })
}

/// Strip directory and `.exe` suffix from a process image name.
fn image_name(raw: &str) -> &str {
    let base = raw.trim().rsplit(['\\', '/']).next().unwrap_or_default();
    match base.len().checked_sub(4) {
        Some(stem) if base.is_char_boundary(stem) && base[stem..].eq_ignore_ascii_case(".exe") => {
            &base[..stem]
        }
        _ => base,
    }
}

/// `"Image Name","PID",...` per line.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_tasklist_csv(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix('"'))
        .filter_map(|rest| rest.split('"').next())
        .map(image_name)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg_attr(windows, allow(dead_code))]
fn parse_ps(output: &str) -> Vec<String> {
    output
        .lines()
        .map(image_name)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fixed process table.
    pub(crate) struct FakeProcesses(pub Vec<&'static str>);

    impl ProcessLister for FakeProcesses {
        async fn process_names(&self) -> io::Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct BrokenLister;

    impl ProcessLister for BrokenLister {
        async fn process_names(&self) -> io::Result<Vec<String>> {
            Err(io::Error::other("no process table"))
        }
    }

    #[tokio::test]
    async fn finds_host_process_ignoring_case() {
        let lister = FakeProcesses(vec!["explorer", "windowssandboxserver", "svchost"]);
        assert_eq!(
            find_isolation_session(&lister).await.as_deref(),
            Some("windowssandboxserver")
        );
    }

    #[tokio::test]
    async fn unrelated_processes_do_not_match() {
        let lister = FakeProcesses(vec!["explorer", "WindowsSandboxHelper"]);
        assert!(find_isolation_session(&lister).await.is_none());
    }

    #[tokio::test]
    async fn listing_failure_counts_as_none() {
        assert!(find_isolation_session(&BrokenLister).await.is_none());
    }

    #[test]
    fn parses_tasklist_csv() {
        let output = "\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r\n\
                      \"WindowsSandbox.exe\",\"4242\",\"Console\",\"1\",\"12,345 K\"\r\n";
        assert_eq!(
            parse_tasklist_csv(output),
            vec!["System Idle Process", "WindowsSandbox"]
        );
    }

    #[test]
    fn parses_ps_output() {
        let output = "/usr/lib/systemd/systemd\nbash\n\n";
        assert_eq!(parse_ps(output), vec!["systemd", "bash"]);
    }
}
