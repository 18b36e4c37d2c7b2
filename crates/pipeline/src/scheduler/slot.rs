use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use sluice_core::{Chunk, Step, StepId, StepOrdering};

/// A registered step with its descriptors cached at registration time, so
/// runnability checks never need the step lock.
///
/// The step itself sits behind its own mutex: a step is claimed off a
/// dispatch queue by exactly one worker at a time, so this lock is
/// uncontended and exists only to hand out `&mut` access from a shared
/// reference.
pub(crate) struct ScheduledStep {
    pub(crate) id: StepId,
    pub(crate) ordering: StepOrdering,
    pub(crate) file_io: bool,
    pub(crate) step: Mutex<Box<dyn Step>>,
}

impl ScheduledStep {
    pub(crate) fn new(id: StepId, step: Box<dyn Step>) -> Self {
        Self {
            id,
            ordering: step.ordering(),
            file_io: step.file_io(),
            step: Mutex::new(step),
        }
    }
}

/// Pending input for one step. Guarded by the scheduler's queue lock.
pub(crate) enum InputBuffer {
    /// Recycle bin for the source: chunks routed back to step 0 so the
    /// source can reuse their buffers. Never makes the source runnable on
    /// its own.
    Source { recycled: VecDeque<Box<dyn Chunk>> },
    /// Sparse seq -> chunk map; the step may only consume `next_seq`.
    Ordered {
        pending: BTreeMap<u64, Box<dyn Chunk>>,
        next_seq: u64,
    },
    /// FIFO of (seq, chunk) pairs consumed in arrival order.
    Unordered {
        pending: VecDeque<(u64, Box<dyn Chunk>)>,
    },
}

impl InputBuffer {
    pub(crate) fn for_step(id: StepId, ordering: StepOrdering) -> Self {
        if id == sluice_core::SOURCE_STEP {
            InputBuffer::Source {
                recycled: VecDeque::new(),
            }
        } else {
            match ordering {
                StepOrdering::Ordered => InputBuffer::Ordered {
                    pending: BTreeMap::new(),
                    next_seq: 0,
                },
                StepOrdering::Unordered => InputBuffer::Unordered {
                    pending: VecDeque::new(),
                },
            }
        }
    }

    /// Whether the step may consume a chunk right now. Source runnability
    /// is tracked by the dispatcher, not by its recycle bin.
    pub(crate) fn has_ready_chunk(&self) -> bool {
        match self {
            InputBuffer::Source { .. } => false,
            InputBuffer::Ordered { pending, next_seq } => pending.contains_key(next_seq),
            InputBuffer::Unordered { pending } => !pending.is_empty(),
        }
    }

}

/// Per-step dispatch state. Guarded by the scheduler's queue lock.
pub(crate) struct StepState {
    pub(crate) buffer: InputBuffer,
    pub(crate) file_io: bool,
    /// Sitting on a dispatch queue.
    pub(crate) queued: bool,
    /// Claimed by a worker.
    pub(crate) running: bool,
}

impl StepState {
    pub(crate) fn new(sched: &ScheduledStep) -> Self {
        Self {
            buffer: InputBuffer::for_step(sched.id, sched.ordering),
            file_io: sched.file_io,
            queued: false,
            running: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_buffer_ready_only_on_next_seq() {
        let mut buf = InputBuffer::Ordered {
            pending: BTreeMap::new(),
            next_seq: 0,
        };
        assert!(!buf.has_ready_chunk());

        if let InputBuffer::Ordered { pending, .. } = &mut buf {
            pending.insert(1, Box::new(1u8) as Box<dyn Chunk>);
        }
        assert!(!buf.has_ready_chunk(), "seq 1 buffered while waiting for 0");

        if let InputBuffer::Ordered { pending, .. } = &mut buf {
            pending.insert(0, Box::new(0u8) as Box<dyn Chunk>);
        }
        assert!(buf.has_ready_chunk());
    }

    #[test]
    fn source_recycle_bin_never_ready() {
        let mut buf = InputBuffer::for_step(0, StepOrdering::Unordered);
        if let InputBuffer::Source { recycled } = &mut buf {
            recycled.push_back(Box::new(7u8) as Box<dyn Chunk>);
        }
        assert!(!buf.has_ready_chunk());
    }
}
