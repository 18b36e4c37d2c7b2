//! Per-worker accumulator pool with a fold-at-end reduction.

use std::sync::Mutex;

use sluice_core::PipelineError;

/// Associative combine used when reducing per-worker accumulators.
pub trait Merge {
    /// Fold `other` into `self`.
    fn merge(&mut self, other: Self);
}

/// Pool that lets worker threads accumulate into private instances of `T`
/// and fold them into a single total once the pipeline drains.
///
/// A worker calls [`acquire`](StatisticsSink::acquire) at the start of an
/// invocation, records into the returned accumulator without contending
/// with other workers, and [`release`](StatisticsSink::release)s it when
/// done. Released instances are handed back out to later acquisitions, so
/// the pool holds at most one instance per concurrently-active worker.
/// After the run, the single consumer calls
/// [`reduce`](StatisticsSink::reduce).
pub struct StatisticsSink<T> {
    pool: Mutex<Pool<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

struct Pool<T> {
    free: Vec<T>,
    outstanding: usize,
}

impl<T> StatisticsSink<T> {
    /// Pool whose new accumulators come from `factory`.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            pool: Mutex::new(Pool {
                free: Vec::new(),
                outstanding: 0,
            }),
            factory: Box::new(factory),
        }
    }

    /// Hand out a released accumulator, or construct a fresh one if none
    /// are free.
    pub fn acquire(&self) -> T {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.outstanding += 1;
        pool.free.pop().unwrap_or_else(|| (self.factory)())
    }

    /// Return an accumulator to the pool after use.
    pub fn release(&self, value: T) {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.outstanding = pool.outstanding.saturating_sub(1);
        pool.free.push(value);
    }
}

impl<T: Merge> StatisticsSink<T> {
    /// Drain the pool and fold every instance into one.
    ///
    /// Requires quiescence: fails if any accumulator is still acquired,
    /// since its counts would silently go missing from the total.
    pub fn reduce(&self) -> Result<T, PipelineError> {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        if pool.outstanding > 0 {
            return Err(PipelineError::SinkInUse(pool.outstanding));
        }

        let mut total = pool.free.pop().unwrap_or_else(|| (self.factory)());
        while let Some(next) = pool.free.pop() {
            total.merge(next);
        }
        Ok(total)
    }
}

impl<T: Default + 'static> Default for StatisticsSink<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}
