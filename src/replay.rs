use std::time::Duration;

use tracing::{info, warn};

use crate::action::ActionLog;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::session::RemoteControlSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
}

/// Re-issues a recorded log, strictly in order, against a session.
///
/// Given the same page and log the same primitive calls are issued in the
/// same order. Page timing is not under our control, which is why a pause is
/// inserted between actions.
#[derive(Debug, Clone)]
pub struct ActionReplayer {
    delay: Duration,
}

impl ActionReplayer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.replay_delay)
    }

    /// Replay every record of a completed log. Stops at the first failure:
    /// `ReplayDivergence` when a selector no longer resolves, otherwise
    /// `ReplayInterrupted`. In both cases `index` is the number of records
    /// that were applied before the failure.
    pub async fn replay(
        &self,
        log: &ActionLog,
        session: &mut RemoteControlSession,
    ) -> Result<ReplayReport> {
        if !log.is_complete() {
            return Err(Error::IncompleteLog(log.id()));
        }
        let total = log.len();
        let cancel = session.cancellation_token();
        info!(log = %log.id(), total, "replaying action log");

        for (index, record) in log.records().iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(Error::ReplayInterrupted { index, source: Box::new(Error::Cancelled) });
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }

            info!(index, total, kind = record.action.kind(), "replaying action");
            if let Err(e) = session.perform(&record.action).await {
                warn!(index, total, error = %e, "replay stopped");
                return Err(match (e.is_element_failure(), record.action.selector()) {
                    (true, Some(selector)) => Error::ReplayDivergence {
                        index,
                        selector: selector.to_string(),
                    },
                    _ => Error::ReplayInterrupted {
                        index,
                        source: Box::new(e),
                    },
                });
            }
        }

        info!(log = %log.id(), applied = total, "replay finished");
        Ok(ReplayReport { applied: total })
    }
}
