//! Dual-queue scheduler for analytical pipelines.
//!
//! Steps are registered by ID before the run; step 0 is the source and is
//! invoked without input. Workers pull runnable steps from two FIFO queues
//! (compute and file-I/O), execute one chunk per dispatch, and route the
//! outputs to their target steps' input buffers. Ordered steps consume
//! strictly ascending sequence numbers; file-I/O steps never overlap.

pub mod metrics;
pub mod runner;
mod slot;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use types::SchedulerConfig;
