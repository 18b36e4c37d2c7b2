use crate::chunk::Chunk;
use crate::error::PipelineError;

/// Identifier a step is registered under, unique within the pipeline.
pub type StepId = usize;

/// The step invoked without input to produce the stream.
pub const SOURCE_STEP: StepId = 0;

/// Chunks emitted by one `process` invocation, each addressed to a
/// downstream step.
pub type StepOutput = Vec<(StepId, Box<dyn Chunk>)>;

/// Whether a step must see its inputs in producer order.
///
/// Steps that write output files are typically ordered so the output order
/// matches the input order; pure compute steps are typically unordered so
/// they can run out of order across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOrdering {
    /// Inputs are delivered in ascending sequence-number order.
    Ordered,
    /// Inputs may be delivered in any order.
    Unordered,
}

/// A processing unit in the pipeline.
///
/// The step registered under [`SOURCE_STEP`] is the source: it is invoked
/// with `None` (or with a chunk that a downstream step routed back to it for
/// buffer reuse) and signals end-of-stream by returning an empty output
/// list. Every other step consumes exactly one chunk per invocation and
/// must emit at least one outbound pair so that ordered downstream steps can
/// advance their sequence counters; a step is freed of that obligation only
/// when everything transitively reachable from it is unordered.
///
/// The scheduler never runs two invocations of the same step concurrently,
/// which is what makes the `&mut self` receivers sound. State aggregated
/// across steps belongs in a statistics sink, not ad-hoc shared mutability.
pub trait Step: Send {
    /// Delivery-order requirement for this step's inputs.
    fn ordering(&self) -> StepOrdering;

    /// True if the step touches files. At most one file-I/O step executes
    /// at any instant.
    fn file_io(&self) -> bool {
        false
    }

    /// Generate, transform, or consume one chunk.
    ///
    /// `input` is `None` only for the source step when no recycled chunk is
    /// available.
    fn process(&mut self, input: Option<Box<dyn Chunk>>) -> Result<StepOutput, PipelineError>;

    /// Called once after the stream drains, in ascending step-ID order with
    /// no `process` invocations in flight.
    fn finalize(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}
