use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::action::{Action, ActionLog, ActionRecord, LogStatus};
use crate::error::{Error, Result};

struct Active {
    started_at: DateTime<Utc>,
    last_timestamp: i64,
    records: Vec<ActionRecord>,
}

/// Collects executed actions into an ordered log. At most one recording is
/// active at a time.
#[derive(Default)]
pub struct ActionRecorder {
    active: Option<Active>,
}

impl ActionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyRecording);
        }
        self.active = Some(Active {
            started_at: Utc::now(),
            last_timestamp: i64::MIN,
            records: Vec::new(),
        });
        info!("started recording actions");
        Ok(())
    }

    /// Append an action that has already executed. No-op when idle.
    pub fn record(&mut self, action: Action) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // wall clock can step backwards; timestamps must not
        let timestamp = Utc::now().timestamp_millis().max(active.last_timestamp);
        active.last_timestamp = timestamp;
        debug!(kind = action.kind(), index = active.records.len(), "recorded action");
        active.records.push(ActionRecord { timestamp, action });
    }

    pub fn stop(&mut self) -> Result<ActionLog> {
        let active = self.active.take().ok_or(Error::NotRecording)?;
        info!(actions = active.records.len(), "stopped recording actions");
        Ok(ActionLog::finalize(
            active.started_at,
            LogStatus::Completed,
            active.records,
        ))
    }

    /// Finalize whatever was captured as a `Cancelled` log.
    pub fn cancel(&mut self) -> Option<ActionLog> {
        let active = self.active.take()?;
        info!(actions = active.records.len(), "recording cancelled");
        Some(ActionLog::finalize(
            active.started_at,
            LogStatus::Cancelled,
            active.records,
        ))
    }
}
