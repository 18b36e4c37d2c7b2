use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, error};

use sluice_core::{Chunk, PipelineError, SOURCE_STEP, StepId, StepOutput};

use crate::scheduler::slot::{InputBuffer, StepState};

/// A step claimed off a dispatch queue, together with the input it will
/// consume. Built under the queue lock so execution needs no further state.
pub(super) struct Claim {
    pub(super) id: StepId,
    /// Claimed from the I/O queue, i.e. currently holds the I/O slot.
    pub(super) io: bool,
    /// `None` only for the source with an empty recycle bin.
    pub(super) input: Option<Box<dyn Chunk>>,
    /// Sequence number of the consumed input; fresh numbers are stamped on
    /// source outputs at completion instead.
    pub(super) seq: u64,
}

/// Everything guarded by the scheduler's queue lock: both runnable queues,
/// the I/O slot flag, per-step buffers, live-chunk accounting, and the
/// run's terminal flags.
pub(super) struct DispatchState {
    pub(super) steps: BTreeMap<StepId, StepState>,
    calc_queue: VecDeque<StepId>,
    io_queue: VecDeque<StepId>,
    io_active: bool,
    source_done: bool,
    /// Chunks outside the source's hands: buffered at a step or held by a
    /// worker mid-invocation.
    pub(super) live_chunks: usize,
    pub(super) peak_live_chunks: usize,
    pub(super) chunks_emitted: u64,
    /// Next fresh sequence number for source output.
    next_seq: u64,
    /// Workers currently executing a claimed step.
    in_flight: usize,
    /// First failure recorded; `run` returns it.
    pub(super) error: Option<PipelineError>,
    high_water: usize,
}

impl DispatchState {
    pub(super) fn new(steps: BTreeMap<StepId, StepState>, high_water: usize) -> Self {
        Self {
            steps,
            calc_queue: VecDeque::new(),
            io_queue: VecDeque::new(),
            io_active: false,
            source_done: false,
            live_chunks: 0,
            peak_live_chunks: 0,
            chunks_emitted: 0,
            next_seq: 0,
            in_flight: 0,
            error: None,
            high_water,
        }
    }

    /// True once the stream is exhausted and every chunk has been consumed.
    pub(super) fn is_drained(&self) -> bool {
        self.source_done && self.live_chunks == 0 && self.in_flight == 0
    }

    /// Record a failure. The first one wins; later failures during shutdown
    /// are dropped.
    pub(super) fn fail(&mut self, err: PipelineError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Push `id` onto the queue matching its I/O attribute.
    fn enqueue(&mut self, id: StepId) {
        let state = self.steps.get_mut(&id).expect("enqueue of unknown step");
        debug_assert!(!state.queued && !state.running);
        state.queued = true;
        if state.file_io {
            self.io_queue.push_back(id);
        } else {
            self.calc_queue.push_back(id);
        }
    }

    /// Queue the source if the stream is still open and the live-chunk
    /// count permits. The throttle is waived when nothing else can run, so
    /// a low high-water mark cannot wedge a fan-out pipeline.
    pub(super) fn maybe_enqueue_source(&mut self) -> bool {
        if self.source_done {
            return false;
        }
        let state = &self.steps[&SOURCE_STEP];
        if state.queued || state.running {
            return false;
        }
        let idle =
            self.calc_queue.is_empty() && self.io_queue.is_empty() && self.in_flight == 0;
        if self.live_chunks < self.high_water || idle {
            self.enqueue(SOURCE_STEP);
            true
        } else {
            false
        }
    }

    /// Re-queue `id` if it holds a consumable chunk and is not already
    /// queued or claimed.
    fn requeue_if_runnable(&mut self, id: StepId) -> bool {
        let state = &self.steps[&id];
        if state.queued || state.running || !state.buffer.has_ready_chunk() {
            return false;
        }
        self.enqueue(id);
        true
    }

    /// Pop the next claimable step: the I/O queue first when the I/O slot
    /// is free, otherwise the compute queue. The input chunk is popped here
    /// as well, under the lock, so ordered consumption is atomic with the
    /// claim.
    pub(super) fn claim_next(&mut self) -> Option<Claim> {
        let (id, io) = if !self.io_active && !self.io_queue.is_empty() {
            let id = self.io_queue.pop_front().expect("io queue checked non-empty");
            self.io_active = true;
            (id, true)
        } else {
            (self.calc_queue.pop_front()?, false)
        };

        let state = self.steps.get_mut(&id).expect("queued step not registered");
        state.queued = false;
        state.running = true;

        let (input, seq) = match &mut state.buffer {
            InputBuffer::Source { recycled } => (recycled.pop_front(), 0),
            InputBuffer::Ordered { pending, next_seq } => {
                let seq = *next_seq;
                let chunk = pending
                    .remove(&seq)
                    .expect("ordered step queued without its next sequence");
                *next_seq += 1;
                (Some(chunk), seq)
            }
            InputBuffer::Unordered { pending } => {
                let (seq, chunk) = pending
                    .pop_front()
                    .expect("unordered step queued with empty buffer");
                (Some(chunk), seq)
            }
        };

        self.in_flight += 1;
        Some(Claim { id, io, input, seq })
    }

    /// Deposit one routed chunk into `to`'s input buffer. Returns whether
    /// the chunk counts toward the live total (recycling to the source does
    /// not).
    fn deposit(
        &mut self,
        from: StepId,
        to: StepId,
        seq: u64,
        chunk: Box<dyn Chunk>,
    ) -> Result<bool, PipelineError> {
        let state = self
            .steps
            .get_mut(&to)
            .ok_or(PipelineError::UnknownTarget { from, to })?;
        match &mut state.buffer {
            InputBuffer::Source { recycled } => {
                recycled.push_back(chunk);
                Ok(false)
            }
            InputBuffer::Ordered { pending, next_seq } => {
                if seq < *next_seq || pending.insert(seq, chunk).is_some() {
                    return Err(PipelineError::DuplicateSequence { step: to, seq });
                }
                Ok(true)
            }
            InputBuffer::Unordered { pending } => {
                pending.push_back((seq, chunk));
                Ok(true)
            }
        }
    }

    /// Fold one finished invocation back into the dispatch state: release
    /// the I/O slot, route the outputs, update live-chunk accounting, and
    /// re-queue whatever became runnable. Returns true when waiting workers
    /// should be woken (new work, a failure, or a terminal transition).
    pub(super) fn finish_invocation(
        &mut self,
        id: StepId,
        io: bool,
        seq: u64,
        result: Result<StepOutput, PipelineError>,
    ) -> bool {
        self.in_flight -= 1;
        if io {
            self.io_active = false;
        }
        self.steps
            .get_mut(&id)
            .expect("finished step not registered")
            .running = false;

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(err) => {
                self.fail(err);
                return true;
            }
        };

        let is_source = id == SOURCE_STEP;
        if is_source && outputs.is_empty() {
            self.source_done = true;
            debug!("source exhausted after {} chunks", self.chunks_emitted);
        }

        let mut touched: Vec<StepId> = Vec::with_capacity(outputs.len());
        let mut deposited_live = 0usize;
        for (to, chunk) in outputs {
            let out_seq = if is_source {
                let fresh = self.next_seq;
                self.next_seq += 1;
                self.chunks_emitted += 1;
                fresh
            } else {
                seq
            };
            match self.deposit(id, to, out_seq, chunk) {
                Ok(true) => {
                    deposited_live += 1;
                    touched.push(to);
                }
                Ok(false) => {}
                Err(err) => {
                    error!("{}", err);
                    self.fail(err);
                    return true;
                }
            }
        }

        // The consumed input dies here; outputs deposited into live buffers
        // replace it. Source invocations consume nothing live.
        self.live_chunks += deposited_live;
        if !is_source {
            self.live_chunks -= 1;
        }
        self.peak_live_chunks = self.peak_live_chunks.max(self.live_chunks);

        let mut woke = false;
        for to in touched {
            woke |= self.requeue_if_runnable(to);
        }
        // Consuming the input may have exposed this step's next sequence.
        woke |= self.requeue_if_runnable(id);
        woke |= self.maybe_enqueue_source();
        // Releasing the I/O slot can unblock an already-queued I/O step.
        woke |= io && !self.io_queue.is_empty();

        if self.is_drained() {
            return true;
        }

        // Nothing queued, nothing running, stream not drained: an ordered
        // step is waiting on a sequence number that will never arrive.
        if self.calc_queue.is_empty() && self.io_queue.is_empty() && self.in_flight == 0 {
            let stalled = PipelineError::Stalled {
                pending: self.live_chunks,
            };
            error!("{}", stalled);
            self.fail(stalled);
            return true;
        }

        woke
    }
}
