use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

pub const SCENARIO_USAGE: &str = "ActivityScenario";
pub const ORCHESTRATOR_USAGE: &str = "Orchestrator";

/// Records which parts of the toolkit a run touched.
pub trait UsageTracker: Send + Sync {
    fn track_usage(&self, usage: &str, version: &str);

    fn send_usages(&self) {}
}

#[derive(Debug, Default)]
pub struct NoOpUsageTracker;

impl UsageTracker for NoOpUsageTracker {
    fn track_usage(&self, _usage: &str, _version: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub usage: String,
    pub version: String,
}

/// Keeps every distinct usage in first-seen order; `send_usages` logs and clears them.
#[derive(Debug, Default)]
pub struct RecordingUsageTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl RecordingUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UsageTracker for RecordingUsageTracker {
    fn track_usage(&self, usage: &str, version: &str) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records
            .iter()
            .any(|record| record.usage == usage && record.version == version)
        {
            return;
        }
        records.push(UsageRecord {
            usage: usage.to_string(),
            version: version.to_string(),
        });
    }

    fn send_usages(&self) {
        let drained = std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner));
        for record in &drained {
            debug!(usage = %record.usage, version = %record.version, "usage");
        }
    }
}
