use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sluice_core::StepId;

/// Operational counters for a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// `process` invocations per step.
    pub invocations: HashMap<StepId, u64>,
    /// Total time spent inside `process` per step.
    pub busy_time: HashMap<StepId, Duration>,
    /// Chunks stamped with a fresh sequence number by the source.
    pub chunks_emitted: u64,
    /// Highest live-chunk count observed during the run.
    pub peak_live_chunks: usize,
    /// When `run` was entered.
    pub started_at: Option<DateTime<Utc>>,
    /// When `run` returned.
    pub finished_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record one step invocation and its wall time.
    pub(crate) fn record_invocation(&mut self, step: StepId, duration: Duration) {
        *self.invocations.entry(step).or_default() += 1;
        *self.busy_time.entry(step).or_default() += duration;
    }

    /// Mean `process` duration for `step`, or `None` if it never ran.
    pub fn mean_duration(&self, step: StepId) -> Option<Duration> {
        let count = *self.invocations.get(&step)?;
        if count == 0 {
            return None;
        }
        let busy = self.busy_time.get(&step).copied().unwrap_or_default();
        Some(busy / count.min(u32::MAX as u64) as u32)
    }
}
