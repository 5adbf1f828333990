//! Replays a [`Trace`] against a [`HeapAllocator`], validating every payload along the way.
use log::{debug, info};
use salloc::{fill_pattern as pattern, AllocError, HeapAllocator, HeapCheckError, HeapPtr};

use crate::trace::{Request, Trace};

/// Knobs for [`replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Run the heap consistency check after every request.
    pub check_each_step: bool,
}

/// Results of a successful replay.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayReport {
    /// Requests executed.
    pub ops: usize,
    /// Largest sum of requested payload bytes live at the same time.
    pub peak_payload: usize,
    /// Heap extent after the last request.
    pub heap_extent: usize,
    /// `peak_payload / heap_extent`.
    pub utilization: f64,
}

/// Why a replay stopped. `step` is the index of the offending request.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The allocator refused a request.
    #[error("step {step}: request for id {id} failed: {source}")]
    Alloc {
        step: usize,
        id: usize,
        source: AllocError,
    },
    /// An allocation named an id that is still live.
    #[error("step {step}: id {id} is still allocated")]
    IdInUse { step: usize, id: usize },
    /// A free named an id that is not live.
    #[error("step {step}: id {id} is not allocated")]
    UnknownId { step: usize, id: usize },
    /// A payload was not 8 byte aligned.
    #[error("step {step}: payload of id {id} is not 8 byte aligned")]
    Misaligned { step: usize, id: usize },
    /// A payload was smaller than requested.
    #[error("step {step}: id {id} got {usable} usable bytes for a {size} byte request")]
    TooSmall {
        step: usize,
        id: usize,
        size: usize,
        usable: usize,
    },
    /// Two live payloads overlap.
    #[error("step {step}: payload of id {id} overlaps id {other}")]
    Overlap { step: usize, id: usize, other: usize },
    /// A payload no longer holds the bytes written to it.
    #[error("step {step}: payload of id {id} corrupted at byte {offset}")]
    Corrupted {
        step: usize,
        id: usize,
        offset: usize,
    },
    /// A zero-allocated payload held a non-zero byte.
    #[error("step {step}: zero-allocated id {id} has a non-zero byte at {offset}")]
    NotZeroed {
        step: usize,
        id: usize,
        offset: usize,
    },
    /// The per-step heap check failed.
    #[error("step {step}: heap check failed: {source}")]
    Check {
        step: usize,
        source: HeapCheckError,
    },
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: HeapPtr,
    size: usize,
}

struct Replayer<'a, A: HeapAllocator> {
    allocator: &'a mut A,
    slots: Vec<Option<Live>>,
    live_payload: usize,
    peak_payload: usize,
}

impl<A: HeapAllocator> Replayer<'_, A> {
    fn step(&mut self, step: usize, req: Request) -> Result<(), ReplayError> {
        debug!("{step}: {req:?}");
        match req {
            Request::Allocate { id, size } => {
                self.vacant(step, id)?;
                let ptr = self
                    .allocator
                    .allocate(size)
                    .map_err(|source| ReplayError::Alloc { step, id, source })?;
                self.admit(step, id, ptr, size)?;
                self.fill(id);
            }
            Request::Free { id } => {
                let live = self.live(step, id)?;
                self.verify(step, id, live.size)?;
                self.allocator.release(Some(live.ptr));
                self.evict(id);
            }
            Request::Reallocate { id, size } => {
                let old = self.slots.get(id).copied().flatten();
                let kept = match old {
                    Some(live) => {
                        self.verify(step, id, live.size)?;
                        live.size.min(size)
                    }
                    None => 0,
                };
                let new = self
                    .allocator
                    .reallocate(old.map(|live| live.ptr), size)
                    .map_err(|source| ReplayError::Alloc { step, id, source })?;
                if old.is_some() {
                    self.evict(id);
                }
                if let Some(ptr) = new {
                    self.admit(step, id, ptr, size)?;
                    self.verify(step, id, kept)?;
                    self.fill(id);
                }
            }
            Request::ZeroAllocate { id, count, size } => {
                self.vacant(step, id)?;
                let ptr = self
                    .allocator
                    .zero_allocate(count, size)
                    .map_err(|source| ReplayError::Alloc { step, id, source })?;
                // Overflow would have failed the request.
                let bytes = count * size;
                self.admit(step, id, ptr, bytes)?;
                if let Some(offset) = self.allocator.payload(ptr)[..bytes]
                    .iter()
                    .position(|b| *b != 0)
                {
                    return Err(ReplayError::NotZeroed { step, id, offset });
                }
                self.fill(id);
            }
        }
        Ok(())
    }

    fn vacant(&self, step: usize, id: usize) -> Result<(), ReplayError> {
        match self.slots.get(id) {
            Some(Some(_)) => Err(ReplayError::IdInUse { step, id }),
            _ => Ok(()),
        }
    }

    fn live(&self, step: usize, id: usize) -> Result<Live, ReplayError> {
        self.slots
            .get(id)
            .copied()
            .flatten()
            .ok_or(ReplayError::UnknownId { step, id })
    }

    /// Validates a fresh payload and records it under `id`.
    fn admit(&mut self, step: usize, id: usize, ptr: HeapPtr, size: usize) -> Result<(), ReplayError> {
        if !ptr.is_aligned() {
            return Err(ReplayError::Misaligned { step, id });
        }
        let usable = self.allocator.usable_size(ptr);
        if usable < size {
            return Err(ReplayError::TooSmall {
                step,
                id,
                size,
                usable,
            });
        }

        let start = ptr.offset();
        let end = start + size;
        let overlap = self.slots.iter().enumerate().find(|(other, live)| {
            live.is_some_and(|live| {
                *other != id && start < live.ptr.offset() + live.size && live.ptr.offset() < end
            })
        });
        if let Some((other, _)) = overlap {
            return Err(ReplayError::Overlap { step, id, other });
        }

        if self.slots.len() <= id {
            self.slots.resize(id + 1, None);
        }
        self.slots[id] = Some(Live { ptr, size });
        self.live_payload += size;
        self.peak_payload = self.peak_payload.max(self.live_payload);
        Ok(())
    }

    fn evict(&mut self, id: usize) {
        if let Some(live) = self.slots[id].take() {
            self.live_payload -= live.size;
        }
    }

    fn fill(&mut self, id: usize) {
        if let Some(live) = self.slots[id] {
            for (i, byte) in self.allocator.payload_mut(live.ptr)[..live.size]
                .iter_mut()
                .enumerate()
            {
                *byte = pattern(id, i);
            }
        }
    }

    /// Checks the first `len` bytes of the payload of `id` against its pattern.
    fn verify(&self, step: usize, id: usize, len: usize) -> Result<(), ReplayError> {
        let live = self.live(step, id)?;
        let payload = &self.allocator.payload(live.ptr)[..len];
        match payload
            .iter()
            .enumerate()
            .position(|(i, byte)| *byte != pattern(id, i))
        {
            Some(offset) => Err(ReplayError::Corrupted { step, id, offset }),
            None => Ok(()),
        }
    }
}

/// Runs every request of `trace` against `allocator`.
///
/// Ids still live at the end of the trace are left allocated.
pub fn replay<A: HeapAllocator>(
    trace: &Trace,
    allocator: &mut A,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let mut replayer = Replayer {
        allocator,
        slots: vec![None; trace.id_count()],
        live_payload: 0,
        peak_payload: 0,
    };

    for (step, req) in trace.requests.iter().enumerate() {
        replayer.step(step, *req)?;
        if options.check_each_step {
            replayer
                .allocator
                .check_heap(false)
                .map_err(|source| ReplayError::Check { step, source })?;
        }
    }

    let heap_extent = replayer.allocator.stats().extent;
    let report = ReplayReport {
        ops: trace.requests.len(),
        peak_payload: replayer.peak_payload,
        heap_extent,
        utilization: replayer.peak_payload as f64 / heap_extent as f64,
    };
    info!(
        "{}: {} ops, peak payload {} bytes, heap {} bytes, utilization {:.1}%",
        trace.name,
        report.ops,
        report.peak_payload,
        report.heap_extent,
        report.utilization * 100.0
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use salloc::{ImplicitAllocator, MemRegion, SegregatedAllocator};

    use super::*;

    fn seglist() -> SegregatedAllocator {
        SegregatedAllocator::init(MemRegion::with_capacity(1 << 20)).unwrap()
    }

    fn run(src: &str) -> Result<ReplayReport, ReplayError> {
        let trace = Trace::parse("inline", src).unwrap();
        replay(
            &trace,
            &mut seglist(),
            ReplayOptions {
                check_each_step: true,
            },
        )
    }

    #[test]
    fn test_basic_replay() {
        let report = run("a 0 100\na 1 200\nr 0 300\nc 2 10 10\nf 1\nf 0\nf 2\n").unwrap();
        assert_eq!(report.ops, 7);
        assert_eq!(report.peak_payload, 600);
        assert_eq!(report.heap_extent, 4096 + 16);
        assert!(report.utilization > 0.1 && report.utilization < 1.0);
    }

    #[test]
    fn test_reallocate_edges() {
        // Realloc of an unknown id allocates, a zero size frees.
        let report = run("r 0 64\nr 0 0\na 0 32\nf 0\n").unwrap();
        assert_eq!(report.peak_payload, 64);
    }

    #[test]
    fn test_payload_holds_fill_pattern() {
        let trace = Trace::parse("inline", "a 0 40\nc 1 3 8\n").unwrap();
        let mut allocator = seglist();
        replay(&trace, &mut allocator, ReplayOptions::default()).unwrap();

        let live: Vec<_> = allocator.arena().blocks().filter(|block| !block.is_free).collect();
        assert_eq!(live.len(), 2);
        for block in &live {
            // 40 bytes need a 48 byte block, 24 bytes a 32 byte one.
            let (id, len) = if block.size == 48 { (0, 40) } else { (1, 24) };
            let payload = &allocator.arena().payload(block)[..len];
            for (i, byte) in payload.iter().enumerate() {
                assert_eq!(*byte, pattern(id, i));
            }
        }
    }

    #[test]
    fn test_bad_ids() {
        assert!(matches!(
            run("f 3\n"),
            Err(ReplayError::UnknownId { step: 0, id: 3 })
        ));
        assert!(matches!(
            run("a 0 8\na 0 8\n"),
            Err(ReplayError::IdInUse { step: 1, id: 0 })
        ));
    }

    #[test]
    fn test_failed_request() {
        assert!(matches!(
            run("a 0 8\na 1 0\n"),
            Err(ReplayError::Alloc {
                step: 1,
                id: 1,
                source: AllocError::InvalidRequest { size: 0 }
            })
        ));
    }

    #[test]
    fn test_implicit_allocator_shrinks() {
        let trace = Trace::parse("inline", "a 0 500\nr 0 16\nr 0 700\nf 0\n").unwrap();
        let mut allocator = ImplicitAllocator::init(MemRegion::with_capacity(1 << 20)).unwrap();
        let report = replay(&trace, &mut allocator, ReplayOptions::default()).unwrap();
        assert_eq!(report.ops, 4);
        assert_eq!(report.peak_payload, 700);
        assert_eq!(allocator.allocation_balance(), 0);
    }

    #[test]
    fn test_sample_traces() {
        for name in ["short.rep", "coalesce.rep", "realloc.rep"] {
            let path = format!("{}/traces/{name}", env!("CARGO_MANIFEST_DIR"));
            let trace = Trace::load(&path).unwrap();
            let mut allocator = seglist();
            replay(
                &trace,
                &mut allocator,
                ReplayOptions {
                    check_each_step: true,
                },
            )
            .unwrap();
            assert_eq!(allocator.allocation_balance(), 0, "{name} leaks");
        }
    }
}
