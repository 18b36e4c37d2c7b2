use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info};

use sluice_core::{Chunk, PipelineError, SOURCE_STEP, StepId, StepOutput};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::slot::{ScheduledStep, StepState};

use super::core::Scheduler;
use super::scheduling::{Claim, DispatchState};

/// Shared context for one pipeline run, borrowed by every worker.
struct RunContext {
    steps: BTreeMap<StepId, ScheduledStep>,
    state: Mutex<DispatchState>,
    work_available: Condvar,
    metrics: Arc<Mutex<SchedulerMetrics>>,
}

impl Scheduler {
    /// Run the pipeline with `nthreads` workers. The calling thread
    /// participates as worker 0; `nthreads - 1` threads are spawned.
    ///
    /// Returns `Ok(())` once the source is exhausted, every buffer has
    /// drained, and every step finalized. Returns the first recorded
    /// failure otherwise; buffered chunks are dropped on the way out and
    /// `finalize` is skipped.
    pub fn run(&mut self, nthreads: usize) -> Result<(), PipelineError> {
        if self.ran {
            return Err(PipelineError::AlreadyRan);
        }
        if nthreads == 0 {
            return Err(PipelineError::InvalidThreadCount);
        }
        if !self.steps.contains_key(&SOURCE_STEP) {
            return Err(PipelineError::MissingSource);
        }
        self.ran = true;

        if let Ok(mut m) = self.metrics.lock() {
            m.started_at = Some(Utc::now());
        }

        let high_water = self.config.resolved_high_water(nthreads);
        let steps: BTreeMap<StepId, ScheduledStep> = std::mem::take(&mut self.steps)
            .into_iter()
            .map(|(id, step)| (id, ScheduledStep::new(id, step)))
            .collect();
        let states: BTreeMap<StepId, StepState> =
            steps.values().map(|s| (s.id, StepState::new(s))).collect();

        let ctx = RunContext {
            steps,
            state: Mutex::new(DispatchState::new(states, high_water)),
            work_available: Condvar::new(),
            metrics: Arc::clone(&self.metrics),
        };

        info!(
            "pipeline starting: {} steps, {} workers, live-chunk high water {}",
            ctx.steps.len(),
            nthreads,
            high_water
        );

        ctx.state.lock().unwrap().maybe_enqueue_source();

        thread::scope(|scope| {
            for i in 1..nthreads {
                let ctx = &ctx;
                thread::Builder::new()
                    .name(format!("pipeline-worker-{}", i))
                    .spawn_scoped(scope, move || worker_loop(ctx))
                    .expect("failed to spawn pipeline worker");
            }
            worker_loop(&ctx);
        });

        let RunContext {
            steps,
            state,
            metrics,
            ..
        } = ctx;
        let mut state = state.into_inner().unwrap_or_else(|e| e.into_inner());

        if let Ok(mut m) = metrics.lock() {
            m.chunks_emitted = state.chunks_emitted;
            m.peak_live_chunks = state.peak_live_chunks;
            m.finished_at = Some(Utc::now());
        }

        if let Some(err) = state.error.take() {
            return Err(err);
        }

        // Stream drained cleanly; finalize in ascending step-ID order with
        // no invocations in flight.
        for (id, sched) in steps {
            debug!("finalizing step {}", id);
            let mut step = sched.step.into_inner().unwrap_or_else(|e| e.into_inner());
            let result = panic::catch_unwind(AssertUnwindSafe(|| step.finalize()))
                .unwrap_or_else(|payload| Err(PipelineError::Step(panic_message(payload))));
            if let Err(err) = result {
                if !matches!(err, PipelineError::Aborted) {
                    error!("step {} failed to finalize: {}", id, err);
                }
                return Err(err);
            }
        }

        info!(
            "pipeline finished: {} chunks through {} steps",
            state.chunks_emitted,
            self.metrics().invocations.len()
        );
        Ok(())
    }
}

/// Per-worker dispatch loop. Claims one runnable step at a time, executes
/// it outside the queue lock, and folds the results back in. Exits on
/// error or once the pipeline drains.
fn worker_loop(ctx: &RunContext) {
    let mut state = ctx.state.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if state.error.is_some() || state.is_drained() {
            break;
        }

        let claim = match state.claim_next() {
            Some(claim) => claim,
            None => {
                state = ctx
                    .work_available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
                continue;
            }
        };
        drop(state);

        let Claim { id, io, input, seq } = claim;
        let started = Instant::now();
        let result = invoke_step(ctx, id, input);

        if let Ok(mut m) = ctx.metrics.lock() {
            m.record_invocation(id, started.elapsed());
        }
        if let Err(err) = &result {
            match err {
                PipelineError::Aborted => debug!("step {} aborted the pipeline", id),
                err => error!("step {} failed: {}", id, err),
            }
        }

        state = ctx.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.finish_invocation(id, io, seq, result) {
            ctx.work_available.notify_all();
        }
    }
    drop(state);
    ctx.work_available.notify_all();
}

/// Execute one claimed step outside the queue lock, converting panics into
/// step failures so a worker never abandons the pool mid-run.
fn invoke_step(
    ctx: &RunContext,
    id: StepId,
    input: Option<Box<dyn Chunk>>,
) -> Result<StepOutput, PipelineError> {
    let sched = ctx.steps.get(&id).expect("claimed step not registered");
    let mut step = sched.step.lock().unwrap_or_else(|e| e.into_inner());
    panic::catch_unwind(AssertUnwindSafe(|| step.process(input)))
        .unwrap_or_else(|payload| Err(PipelineError::Step(panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "step panicked".to_string(),
        },
    }
}
