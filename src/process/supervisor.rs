use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProcessError;

/// How long disposal waits for a killed child to go away.
const DISPOSE_WAIT: Duration = Duration::from_secs(5);

/// How long the exit event waits for the output readers to drain.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Exit code reported when the OS gives none (killed by a signal).
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Something observed about the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exited(i32),
}

struct Running {
    pid: u32,
    kill: CancellationToken,
    exit: watch::Receiver<Option<i32>>,
    waiter: Option<JoinHandle<()>>,
}

impl Running {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Supervises a single child process.
pub struct ProcessSupervisor {
    events: broadcast::Sender<ProcessEvent>,
    running: Mutex<Option<Running>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            running: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Subscribe to output and exit events. Subscribe before `start` to see
    /// every line.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Start the child and return its process id.
    ///
    /// Fails if this supervisor already started a process or if spawning fails.
    pub fn start<I, S>(
        &self,
        program: impl AsRef<OsStr>,
        args: I,
        working_dir: Option<&Path>,
    ) -> Result<u32, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.ensure_not_disposed()?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyStarted);
        }

        let program = program.as_ref();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir.filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            command.creation_flags(0x0800_0000);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(ProcessError::Spawn {
                    program: program.to_string_lossy().into_owned(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        debug!(pid, program = %program.to_string_lossy(), "Process started");

        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| forward_lines(out, self.events.clone(), ProcessEvent::Stdout)),
            child
                .stderr
                .take()
                .map(|err| forward_lines(err, self.events.clone(), ProcessEvent::Stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();
        let kill_signal = kill.clone();
        let events = self.events.clone();

        let waiter = tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_signal.cancelled() => None,
            };

            let status = match finished {
                Some(status) => status,
                None => {
                    debug!(pid, "Killing process");
                    if let Err(e) = child.start_kill() {
                        debug!(pid, "Kill failed (process likely exited): {}", e);
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT_CODE),
                Err(e) => {
                    warn!(pid, "Failed to wait for process: {}", e);
                    UNKNOWN_EXIT_CODE
                }
            };

            // Deliver trailing output before the exit event.
            for reader in readers {
                let _ = tokio::time::timeout(OUTPUT_DRAIN, reader).await;
            }

            debug!(pid, code, "Process exited");
            exit_tx.send_replace(Some(code));
            let _ = events.send(ProcessEvent::Exited(code));
        });

        *self.lock_running() = Some(Running {
            pid,
            kill,
            exit: exit_rx,
            waiter: Some(waiter),
        });

        Ok(pid)
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// Cancelling `cancel` kills the child and returns
    /// [`ProcessError::Cancelled`].
    pub async fn wait_for_exit(&self, cancel: &CancellationToken) -> Result<i32, ProcessError> {
        self.ensure_not_disposed()?;

        let mut exit = match self.lock_running().as_ref() {
            Some(running) => running.exit.clone(),
            None => return Err(ProcessError::NotStarted),
        };

        tokio::select! {
            result = exit.wait_for(Option::is_some) => {
                let code = match result {
                    Ok(code) => code.unwrap_or(UNKNOWN_EXIT_CODE),
                    Err(_) => UNKNOWN_EXIT_CODE,
                };
                Ok(code)
            }
            _ = cancel.cancelled() => {
                self.kill();
                Err(ProcessError::Cancelled)
            }
        }
    }

    /// Kill the child. No-op if it never started or already exited.
    pub fn kill(&self) {
        if let Some(running) = self.lock_running().as_ref()
            && !running.has_exited()
        {
            running.kill.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.has_exited() && !r.kill.is_cancelled())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lock_running().as_ref().and_then(|r| *r.exit.borrow())
    }

    /// Kill a still-running child, wait a bounded time for it, and release it.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(mut running) = self.lock_running().take() else {
            return;
        };

        if !running.has_exited() {
            running.kill.cancel();
            if tokio::time::timeout(DISPOSE_WAIT, running.exit.wait_for(Option::is_some))
                .await
                .is_err()
            {
                warn!(pid = running.pid, "Process did not exit within {:?}", DISPOSE_WAIT);
            }
        }

        if let Some(waiter) = running.waiter.take()
            && !waiter.is_finished()
        {
            waiter.abort();
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), ProcessError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(ProcessError::Disposed)
        } else {
            Ok(())
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = running.as_ref() {
            running.kill.cancel();
        }
    }
}

/// Forward lines from a child pipe as events. Invalid UTF-8 is replaced
/// rather than ending the stream.
fn forward_lines<R>(
    reader: R,
    events: broadcast::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    let _ = events.send(wrap(line));
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> (ProcessSupervisor, u32) {
        let supervisor = ProcessSupervisor::new();
        let pid = supervisor.start("sh", ["-c", script], None).unwrap();
        (supervisor, pid)
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let (supervisor, pid) = sh("exit 3");
        assert!(pid > 0);

        let code = supervisor
            .wait_for_exit(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, 3);
        assert_eq!(supervisor.exit_code(), Some(3));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn streams_output_lines_then_exit() {
        let supervisor = ProcessSupervisor::new();
        let mut events = supervisor.subscribe();
        supervisor
            .start("sh", ["-c", "echo one; echo two >&2; exit 0"], None)
            .unwrap();

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let done = matches!(event, ProcessEvent::Exited(_));
            seen.push(event);
            if done {
                break;
            }
        }

        assert!(seen.contains(&ProcessEvent::Stdout("one".into())));
        assert!(seen.contains(&ProcessEvent::Stderr("two".into())));
        assert_eq!(seen.last(), Some(&ProcessEvent::Exited(0)));
    }

    #[tokio::test]
    async fn honours_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new();
        let mut events = supervisor.subscribe();
        supervisor.start("pwd", Vec::<String>::new(), Some(tmp.path())).unwrap();

        let expected = tmp.path().canonicalize().unwrap();
        match events.recv().await.unwrap() {
            ProcessEvent::Stdout(line) => {
                assert_eq!(std::path::PathBuf::from(line).canonicalize().unwrap(), expected)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (supervisor, _) = sh("exit 0");
        let err = supervisor.start("sh", ["-c", "exit 0"], None).unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyStarted));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let supervisor = ProcessSupervisor::new();
        let err = supervisor
            .start("/definitely/not/a/binary", Vec::<String>::new(), None)
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn waiting_before_start_is_an_error() {
        let supervisor = ProcessSupervisor::new();
        let err = supervisor
            .wait_for_exit(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotStarted));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let (supervisor, _) = sh("sleep 30");
        assert!(supervisor.is_running());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = supervisor.wait_for_exit(&cancel).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
        assert!(!supervisor.is_running());

        // The waiter still records the exit after the kill.
        let code = supervisor
            .wait_for_exit(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, UNKNOWN_EXIT_CODE);
    }

    #[tokio::test]
    async fn kill_and_dispose_are_idempotent() {
        let never_started = ProcessSupervisor::new();
        never_started.kill();
        never_started.kill();
        never_started.dispose().await;
        never_started.dispose().await;
        assert!(!never_started.is_running());

        let (supervisor, _) = sh("sleep 30");
        supervisor.kill();
        supervisor.kill();
        assert!(!supervisor.is_running());
        supervisor.dispose().await;
        supervisor.dispose().await;
        supervisor.kill();
        assert!(!supervisor.is_running());

        let err = supervisor
            .wait_for_exit(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Disposed));
    }

    #[tokio::test]
    async fn dispose_kills_running_child() {
        let (supervisor, _) = sh("sleep 30");
        let mut events = supervisor.subscribe();

        supervisor.dispose().await;
        assert!(!supervisor.is_running());
        assert!(matches!(events.recv().await.unwrap(), ProcessEvent::Exited(_)));
    }
}
