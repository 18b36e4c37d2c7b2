use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex};

use tracing::debug;

use sluice_core::{PipelineError, Step, StepId};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::types::SchedulerConfig;

/// The pipeline scheduler. Owns the registered steps and executes them on a
/// worker pool with ordered delivery and file-I/O exclusion.
///
/// Steps are registered by integer ID; step 0 is the source and is invoked
/// without input. See [`Step`] for the processing contract.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    /// Registered steps, keyed by ID. Drained into the run context when the
    /// pipeline starts.
    pub(super) steps: BTreeMap<StepId, Box<dyn Step>>,
    /// Run metrics, shared with the worker pool.
    pub(super) metrics: Arc<Mutex<SchedulerMetrics>>,
    /// Set once `run` has been entered; a scheduler runs at most once.
    pub(super) ran: bool,
}

impl Scheduler {
    /// Create a scheduler with default tuning.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with explicit tuning knobs.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            steps: BTreeMap::new(),
            metrics: Arc::new(Mutex::new(SchedulerMetrics::default())),
            ran: false,
        }
    }

    /// Register `step` under `id`, transferring ownership to the scheduler.
    ///
    /// Chunks returned by other steps with `id` as their target land in this
    /// step's input buffer. Registering an ID twice fails (and drops the
    /// rejected step).
    pub fn add_step(&mut self, id: StepId, step: Box<dyn Step>) -> Result<(), PipelineError> {
        match self.steps.entry(id) {
            Entry::Occupied(_) => Err(PipelineError::DuplicateStep(id)),
            Entry::Vacant(entry) => {
                debug!(
                    "registered step {} (ordering: {:?}, file_io: {})",
                    id,
                    step.ordering(),
                    step.file_io()
                );
                entry.insert(step);
                Ok(())
            }
        }
    }

    /// Run with the worker count resolved from the config.
    pub fn run_default(&mut self) -> Result<(), PipelineError> {
        let nthreads = self.config.effective_workers();
        self.run(nthreads)
    }

    /// Snapshot of the current run metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
