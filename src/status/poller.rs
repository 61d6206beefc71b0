use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::service::StatusService;

/// Check often right after startup, then settle to a slower pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial_interval: Duration,
    pub initial_checks: u32,
    pub steady_interval: Duration,
}

impl Default for PollSchedule {
    /// Every 10s for the first six checks, then every 30s.
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            initial_checks: 6,
            steady_interval: Duration::from_secs(30),
        }
    }
}

impl PollSchedule {
    /// Delay before the next check, given how many timer checks have run.
    pub fn interval_after(&self, completed_checks: u32) -> Duration {
        if completed_checks < self.initial_checks {
            self.initial_interval
        } else {
            self.steady_interval
        }
    }
}

/// Background timer that keeps the published status fresh.
pub struct StatusPoller {
    service: Arc<StatusService>,
    schedule: PollSchedule,
}

impl StatusPoller {
    pub fn new(service: Arc<StatusService>, schedule: PollSchedule) -> Self {
        Self { service, schedule }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut completed = 0u32;
        loop {
            let delay = self.schedule.interval_after(completed);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            self.service.refresh().await;
            completed = completed.saturating_add(1);
        }
        debug!(checks = completed, "Status poller stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
