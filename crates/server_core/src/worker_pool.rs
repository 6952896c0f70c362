//! The DSP worker pool (component E): a fixed, persistent `rayon` thread pool that
//! drains one work queue per audio block.
//!
//! One thread is the "helper": it owns the node tree and the command intake, resets
//! the queue's activation counters, seeds the runnable set, then joins the pool's
//! workers for the block. The rest are plain workers. Both roles run the same inner
//! loop; the helper is only distinguished by what it does between blocks.
//!
//! The pool itself has the same explicit init/teardown lifecycle as the real-time
//! pool (component A): a host calls [`WorkerPool::init`] once up front and
//! [`WorkerPool::teardown`] on shutdown, rather than spawning fresh OS threads every
//! block the way an ad hoc `std::thread::scope` dispatch would.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use crossbeam::queue::SegQueue;

use crate::queue::WorkQueue;

static POOL: RwLock<Option<rayon::ThreadPool>> = RwLock::new(None);

/// Handle to the process-wide DSP worker pool.
pub struct WorkerPool;

impl WorkerPool {
    /// Builds the persistent `rayon::ThreadPool` backing [`drain_block`]. Must be
    /// called before the first block is drained. Calling it twice without an
    /// intervening `teardown` replaces the previous pool.
    pub fn init(worker_count: usize) {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .build()
            .expect("failed to build DSP worker thread pool");
        *POOL.write().unwrap() = Some(pool);
    }

    /// Tears down the pool, joining its threads.
    pub fn teardown() {
        *POOL.write().unwrap() = None;
    }
}

/// Number of `std::thread::yield_now` spins attempted before a worker re-reads the
/// completion counter is folded into the spin loop itself; there is no separate
/// sleep tier here, unlike the logging background thread, because a block's worth
/// of work is expected to drain in microseconds, not milliseconds.
const SPIN_ITERATIONS: u32 = 64;

/// Count of blocks that overran their soft deadline (`config::block_period`). Counted
/// rather than surfaced per-occurrence, per the "audio glitches" error-handling policy:
/// never fatal, logged through the RT-safe path, read back by the helper as a status
/// counter.
static GLITCH_COUNT: AtomicU64 = AtomicU64::new(0);

/// Total number of blocks that have overrun their soft deadline since process start.
pub fn glitch_count() -> u64 {
    GLITCH_COUNT.load(Ordering::Relaxed)
}

/// Runs one block's worth of work against `queue`, calling `run_synth(id, block)` for
/// each synth id in each job, in job order. The pool set up by [`WorkerPool::init`]
/// is borrowed for the duration of the call; the calling thread also participates as
/// a worker rather than sitting idle while the pool drains.
///
/// The queue's activation counters are reset before seeding, so the same `WorkQueue`
/// may be drained block after block as long as its topology hasn't changed. If the
/// drain takes longer than `config::block_period()`, the overrun is counted and logged
/// through the RT-safe logging path rather than treated as an error: correctness over
/// liveness, per the crate's real-time error-handling policy.
pub fn drain_block(queue: &WorkQueue, worker_count: usize, block: &mut [f32], run_synth: impl Fn(i32, &mut [f32]) + Sync) {
    crate::is_audio_thread::mark_audio_thread();
    let started = Instant::now();

    queue.reset();

    let runnable: SegQueue<u32> = SegQueue::new();
    for &idx in queue.initially_runnable() {
        runnable.push(idx);
    }

    let remaining = AtomicUsize::new(queue.item_count());
    if remaining.load(Ordering::Relaxed) == 0 {
        return;
    }

    let runnable = &runnable;
    let remaining = &remaining;
    let run_synth = &run_synth;
    // Every worker needs to reach the same output buffer at once - see `BlockCell`'s
    // own doc comment for why that's sound despite `&mut [f32]` itself not being
    // `Copy` or shareable across threads.
    let block_cell = BlockCell::new(block);

    let guard = POOL.read().unwrap();
    let pool = guard.as_ref().expect("WorkerPool::init was not called");
    pool.scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(move |_| {
                crate::is_audio_thread::mark_audio_thread();
                worker_loop(queue, runnable, remaining, block_cell, run_synth)
            });
        }
        worker_loop(queue, runnable, remaining, block_cell, run_synth);
    });

    let elapsed = started.elapsed();
    if elapsed > crate::config::block_period() {
        GLITCH_COUNT.fetch_add(1, Ordering::Relaxed);
        rt_warn!(
            "audio block overran its soft deadline: took {:?}, budget {:?}",
            elapsed,
            crate::config::block_period()
        );
    }
}

/// A shared handle onto one block's output buffer, modeled on the way the teacher's
/// own per-block bus buffer hands out concurrent access: wrap it in an `UnsafeCell`
/// rather than mint competing `&mut [f32]` aliases from a raw pointer cast. Two
/// parallel-group sibling synths really can run on different workers at the same
/// instant, each reaching into `block` - `UnsafeCell` is what makes a shared `*const`
/// to it legal to hold from multiple threads simultaneously; nothing here proves the
/// writes themselves don't race, because a single shared output block mixed by
/// several concurrent synths is fundamentally an additive-mixing contract the type
/// system can't check. That contract lives with callers of `run_synth`: every synth
/// closure must only ever *add* into the samples it owns and never read-modify-write
/// a sample another synth might be adding into at the same time (e.g. `s[i] += x`,
/// computed from the synth's own state, never `s[i] = f(s[i])`). Sequential chains
/// don't need this, since job order already serializes them; only the parallel-group
/// case relies on it.
#[derive(Clone, Copy)]
struct BlockCell(*const UnsafeCell<[f32]>);

unsafe impl Send for BlockCell {}
unsafe impl Sync for BlockCell {}

impl BlockCell {
    fn new(block: &mut [f32]) -> Self {
        Self(block as *mut [f32] as *const UnsafeCell<[f32]>)
    }

    /// SAFETY: the caller must uphold the additive-mixing contract documented on
    /// `BlockCell` itself - this only hands back the raw pointer already stored, it
    /// never itself claims exclusive access.
    unsafe fn get(self) -> *mut [f32] {
        UnsafeCell::raw_get(self.0)
    }
}

/// The inner loop shared by the helper thread and every plain worker: pop a runnable
/// item, run its job, propagate completion to its successors, repeat until every
/// item in the block has executed exactly once.
fn worker_loop(
    queue: &WorkQueue,
    runnable: &SegQueue<u32>,
    remaining: &AtomicUsize,
    block_cell: BlockCell,
    run_synth: &(impl Fn(i32, &mut [f32]) + Sync),
) {
    loop {
        if remaining.load(Ordering::Acquire) == 0 {
            return;
        }

        match runnable.pop() {
            Some(idx) => {
                let item = queue.item(idx);
                for &synth_id in item.job() {
                    // SAFETY: see the additive-mixing contract documented on
                    // `BlockCell`.
                    run_synth(synth_id, unsafe { &mut *block_cell.get() });
                }
                for newly_runnable in queue.signal_finished(idx) {
                    runnable.push(newly_runnable);
                }
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    return;
                }
            }
            None => {
                let mut spins = 0;
                while runnable.is_empty() && spins < SPIN_ITERATIONS {
                    std::hint::spin_loop();
                    spins += 1;
                }
                if runnable.is_empty() && remaining.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_tree::{NewNodeKind, Placement, Position, ServerTree, NodeId};
    use crate::rt_pool::{RtPool, RtPoolCapacities};
    use std::sync::atomic::AtomicU32;

    fn with_pool<R>(f: impl FnOnce() -> R) -> R {
        RtPool::init(RtPoolCapacities {
            jobs: 64,
            successors: 64,
            scratch: 16,
        });
        WorkerPool::init(2);
        let r = f();
        WorkerPool::teardown();
        RtPool::teardown();
        r
    }

    #[test]
    fn every_synth_runs_exactly_once() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            for id in 1..=8 {
                tree.add(
                    NodeId(id),
                    NewNodeKind::Synth(Box::new(|_: &mut [f32]| {})),
                    Position {
                        reference: NodeId(0),
                        placement: Placement::Tail,
                    },
                )
                .unwrap();
            }
            let queue = crate::generator::generate(&tree.snapshot_for_scheduling()).unwrap();

            let run_counts: Vec<AtomicU32> = (0..=8).map(|_| AtomicU32::new(0)).collect();
            let mut block = [0.0f32; 4];
            drain_block(&queue, 2, &mut block, |id, _block| {
                run_counts[id as usize].fetch_add(1, Ordering::Relaxed);
            });

            for id in 1..=8usize {
                assert_eq!(run_counts[id].load(Ordering::Relaxed), 1);
            }
        });
    }

    #[test]
    fn satellite_ordering_is_respected_across_workers() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(
                NodeId(1000),
                NewNodeKind::Synth(Box::new(|_: &mut [f32]| {})),
                Position {
                    reference: NodeId(0),
                    placement: Placement::Tail,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1001),
                NewNodeKind::Synth(Box::new(|_: &mut [f32]| {})),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteBefore,
                },
            )
            .unwrap();
            let queue = crate::generator::generate(&tree.snapshot_for_scheduling()).unwrap();

            let order = std::sync::Mutex::new(Vec::new());
            let mut block = [0.0f32; 4];
            drain_block(&queue, 3, &mut block, |id, _block| {
                order.lock().unwrap().push(id);
            });

            let order = order.into_inner().unwrap();
            let pos_satellite = order.iter().position(|&i| i == 1001).unwrap();
            let pos_reference = order.iter().position(|&i| i == 1000).unwrap();
            assert!(pos_satellite < pos_reference);
        });
    }
}
