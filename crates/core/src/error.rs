use thiserror::Error;

use crate::step::StepId;

/// Failures raised while building or running a pipeline.
///
/// Configuration variants are returned before any worker starts; the rest
/// are recorded during the run and returned from `Scheduler::run`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("step id {0} is already registered")]
    DuplicateStep(StepId),

    #[error("no source step registered (step {id})", id = crate::step::SOURCE_STEP)]
    MissingSource,

    #[error("worker thread count must be at least 1")]
    InvalidThreadCount,

    #[error("pipeline has already run")]
    AlreadyRan,

    /// A step's `process` or `finalize` failed with a message.
    #[error("step failed: {0}")]
    Step(String),

    /// Silent termination requested by a step. The step has already emitted
    /// its own diagnostic, so the scheduler logs nothing for this variant.
    #[error("pipeline aborted")]
    Aborted,

    /// A chunk was routed to a step ID nothing is registered under.
    #[error("step {from} routed a chunk to unknown step {to}")]
    UnknownTarget { from: StepId, to: StepId },

    /// An ordered step was handed two chunks with the same sequence number.
    #[error("ordered step {step} received duplicate sequence {seq}")]
    DuplicateSequence { step: StepId, seq: u64 },

    /// Chunks remain buffered but no step can consume them and nothing is
    /// in flight: an upstream step dropped a sequence number an ordered
    /// downstream is still waiting for.
    #[error("pipeline stalled with {pending} chunk(s) buffered and no runnable step")]
    Stalled { pending: usize },

    /// `reduce` was called on a statistics sink while accumulators were
    /// still checked out.
    #[error("statistics sink reduced with {0} accumulator(s) still acquired")]
    SinkInUse(usize),
}

impl PipelineError {
    /// Wrap an arbitrary message as a step failure.
    pub fn step(msg: impl Into<String>) -> Self {
        PipelineError::Step(msg.into())
    }
}
