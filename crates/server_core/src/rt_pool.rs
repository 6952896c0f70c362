//! The real-time memory pool (component A): one lock-free fixed-size free list per
//! concrete type that flows through a rebuild (queue items, successor arrays,
//! sequential-child scratch buffers).
//!
//! A single process-wide pool is acceptable, but it has an explicit lifecycle rather
//! than being built lazily on first use: an embedding host calls [`RtPool::init`]
//! before creating the first node, and [`RtPool::teardown`] once the tree has been
//! emptied. This mirrors how the rest of the crate prefers an explicit call over a
//! `lazy_static`-only global whenever the lifecycle is caller-visible.

use std::num::NonZeroU16;
use std::sync::{Arc, RwLock};

use audio_synchronization::fixed_size_pool::{ExclusiveFixedSizePoolHandle, FixedSizePool};

use crate::error::{Error, Result};
use crate::queue::{JobList, SuccessorList};

/// A scratch buffer used by the generator while packing a run of sequential synths
/// into a single job, in reverse tree order.
pub(crate) type ScratchBuffer = Vec<i32>;

pub(crate) type JobHandle = ExclusiveFixedSizePoolHandle<JobList>;
pub(crate) type SuccessorHandle = ExclusiveFixedSizePoolHandle<SuccessorList>;
pub(crate) type ScratchHandle = ExclusiveFixedSizePoolHandle<ScratchBuffer>;

struct Pools {
    jobs: Arc<FixedSizePool<JobList>>,
    successors: Arc<FixedSizePool<SuccessorList>>,
    scratch: Arc<FixedSizePool<ScratchBuffer>>,
}

static POOLS: RwLock<Option<Pools>> = RwLock::new(None);

/// Capacities for the three free lists the real-time pool is made of.
#[derive(Copy, Clone, Debug)]
pub struct RtPoolCapacities {
    pub jobs: u16,
    pub successors: u16,
    pub scratch: u16,
}

impl Default for RtPoolCapacities {
    fn default() -> Self {
        Self {
            jobs: crate::config::DEFAULT_ITEM_POOL_CAPACITY,
            successors: crate::config::DEFAULT_SUCCESSOR_POOL_CAPACITY,
            scratch: crate::config::DEFAULT_SCRATCH_POOL_CAPACITY,
        }
    }
}

/// Handle to the process-wide real-time pool. Acquired once by the helper thread at
/// the start of a rebuild and held for its duration; never touched by workers.
pub struct RtPool;

impl RtPool {
    /// Sets up the three free lists. Must be called before the first node is
    /// created. Calling it twice without an intervening `teardown` replaces the
    /// previous pools (any outstanding handles from the old pools remain valid
    /// until dropped; only new allocations draw from the fresh ones).
    pub fn init(capacities: RtPoolCapacities) {
        fn cap(n: u16) -> NonZeroU16 {
            NonZeroU16::new(n.max(1)).unwrap()
        }
        let pools = Pools {
            jobs: Arc::new(FixedSizePool::new(cap(capacities.jobs))),
            successors: Arc::new(FixedSizePool::new(cap(capacities.successors))),
            scratch: Arc::new(FixedSizePool::new(cap(capacities.scratch))),
        };
        *POOLS.write().unwrap() = Some(pools);
    }

    /// Tears down the pool. Must only be called once the tree is empty: any handle
    /// still alive at that point is simply freed normally when it drops.
    pub fn teardown() {
        *POOLS.write().unwrap() = None;
    }

    pub(crate) fn allocate_job(job: JobList) -> Result<JobHandle> {
        let guard = POOLS.read().unwrap();
        let pools = guard.as_ref().expect("RtPool::init was not called");
        pools.jobs.allocate(job).map_err(|_| pool_exhausted("queue item job"))
    }

    pub(crate) fn allocate_successors(successors: SuccessorList) -> Result<SuccessorHandle> {
        let guard = POOLS.read().unwrap();
        let pools = guard.as_ref().expect("RtPool::init was not called");
        pools
            .successors
            .allocate(successors)
            .map_err(|_| pool_exhausted("successor array"))
    }

    pub(crate) fn allocate_scratch() -> Result<ScratchHandle> {
        let guard = POOLS.read().unwrap();
        let pools = guard.as_ref().expect("RtPool::init was not called");
        pools
            .scratch
            .allocate(Vec::new())
            .map_err(|_| pool_exhausted("scratch buffer"))
    }
}

/// Builds and RT-logs a `PoolExhausted` error. Logged here rather than left to the
/// caller so every exhaustion - however it's eventually handled - is visible through
/// the RT-safe logging path (see `crate::logging`) without every call site repeating
/// the log statement.
fn pool_exhausted(what: &'static str) -> Error {
    rt_warn!("real-time pool exhausted while allocating {}", what);
    Error::PoolExhausted { what }
}
