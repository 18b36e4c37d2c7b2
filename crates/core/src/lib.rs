//! Core contracts shared by the sluice pipeline crates: the opaque chunk
//! payload, the step trait, and the error taxonomy.

pub mod chunk;
pub mod error;
pub mod step;

pub use chunk::Chunk;
pub use error::PipelineError;
pub use step::{SOURCE_STEP, Step, StepId, StepOrdering, StepOutput};
