//! Proactive token refresh

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_LEAD_TIME};
use crate::refresh::RefreshCoordinator;

/// What a scheduler tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No access token stored
    NoToken,
    /// Token already expired; left to the next request's 401 handling
    Expired,
    /// Token not yet inside the refresh window
    Fresh,
    /// Token refreshed
    Refreshed,
    /// Refresh or storage failure (logged)
    Failed,
}

/// Background task that refreshes tokens shortly before they expire
///
/// The first tick fires one interval after [`start`](Self::start). Starting
/// again replaces the running task, so at most one task exists per scheduler.
pub struct RefreshScheduler {
    coordinator: RefreshCoordinator,
    interval: Duration,
    lead_time: Duration,
    task: Mutex<Option<ScheduledTask>>,
}

struct ScheduledTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("interval", &self.interval)
            .field("lead_time", &self.lead_time)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RefreshScheduler {
    /// Create a stopped scheduler with the default interval (15 min) and
    /// lead time (30 min)
    #[must_use]
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self::with_timing(coordinator, DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_LEAD_TIME)
    }

    /// Create a stopped scheduler with custom timing
    #[must_use]
    pub fn with_timing(
        coordinator: RefreshCoordinator,
        interval: Duration,
        lead_time: Duration,
    ) -> Self {
        Self {
            coordinator,
            // tokio intervals panic on zero
            interval: interval.max(Duration::from_millis(1)),
            lead_time,
            task: Mutex::new(None),
        }
    }

    /// Tick interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh window before expiry
    #[must_use]
    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    /// Start ticking, replacing any running task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let coordinator = self.coordinator.clone();
        let (interval, lead_time) = (self.interval, self.lead_time);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = run_tick(&coordinator, lead_time).await;
                        tracing::trace!(?outcome, "Refresh scheduler tick");
                    }
                }
            }
            tracing::debug!("Refresh scheduler stopped");
        });

        tracing::debug!(
            interval_secs = interval.as_secs(),
            lead_time_secs = lead_time.as_secs(),
            "Refresh scheduler started"
        );
        *slot = Some(ScheduledTask { cancel, handle });
    }

    /// Stop the running task, if any
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel.cancel();
        }
    }

    /// Whether a task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.cancel.is_cancelled() && !task.handle.is_finished())
    }

    /// Run one check immediately, outside the schedule
    pub async fn tick(&self) -> TickOutcome {
        run_tick(&self.coordinator, self.lead_time).await
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_tick(coordinator: &RefreshCoordinator, lead_time: Duration) -> TickOutcome {
    let store = coordinator.store();

    match store.access_token().await {
        Ok(Some(_)) => {}
        Ok(None) => return TickOutcome::NoToken,
        Err(e) => {
            tracing::warn!(error = %e, "Scheduler could not read credentials");
            return TickOutcome::Failed;
        }
    }

    if store.is_expired().await {
        tracing::debug!("Token already expired, skipping proactive refresh");
        return TickOutcome::Expired;
    }

    match coordinator.refresh_if_expiring(lead_time).await {
        Ok(Some(_)) => TickOutcome::Refreshed,
        Ok(None) => TickOutcome::Fresh,
        Err(e) => {
            tracing::warn!(error = %e, "Proactive refresh failed");
            TickOutcome::Failed
        }
    }
}
