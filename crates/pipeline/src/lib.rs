//! Multithreaded pipeline scheduler.
//!
//! A pipeline is a set of [`Step`](sluice_core::Step)s registered by integer
//! ID, exchanging opaque chunks. The [`Scheduler`] runs them on a pool of
//! worker threads with two delivery guarantees: ordered steps see their
//! inputs in source order, and at most one file-I/O step executes at any
//! instant. Worker threads accumulate summary state through
//! [`StatisticsSink`] and fold it into a single result once the stream
//! drains.

pub mod scheduler;
pub mod sink;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics};
pub use sink::{Merge, StatisticsSink};
