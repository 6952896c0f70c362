//! The work queue (component C): the flattened, pool-allocated DAG the generator
//! produces and the worker pool drains once per block.

use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;

use crate::rt_pool::{JobHandle, RtPool, SuccessorHandle};

/// The synth ids to run, in order, on whichever worker picks up this item.
pub(crate) type JobList = SmallVec<[i32; 4]>;

/// Indices (into a [`WorkQueue`]'s item vector) of the items this item unblocks when
/// it finishes.
pub(crate) type SuccessorList = SmallVec<[u32; 4]>;

/// One unit of schedulable work.
pub(crate) struct QueueItem {
    job: JobHandle,
    successors: SuccessorHandle,
    activation_limit: u32,
    activation_count: AtomicU32,
}

impl QueueItem {
    fn new(job: JobHandle, successors: SuccessorHandle, activation_limit: u32) -> Self {
        Self {
            job,
            successors,
            activation_count: AtomicU32::new(activation_limit),
            activation_limit,
        }
    }

    /// The synths to run, in tree order.
    pub(crate) fn job(&self) -> &[i32] {
        &self.job
    }

    pub(crate) fn activation_limit(&self) -> u32 {
        self.activation_limit
    }

    #[cfg(debug_assertions)]
    pub(crate) fn successors(&self) -> &[u32] {
        &self.successors
    }

    /// Resets the activation count back to its limit, ahead of a fresh drain.
    pub(crate) fn reset(&self) {
        self.activation_count
            .store(self.activation_limit, Ordering::Relaxed);
    }

    /// Decrements the activation count; returns `true` exactly once, the call that
    /// brings it to zero (this item has become runnable).
    fn decrement(&self) -> bool {
        let prev = self.activation_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "activation count underflowed");
        prev == 1
    }
}

/// The full DAG of queue items produced by one generator run.
pub struct WorkQueue {
    items: Vec<QueueItem>,
    initially_runnable: Vec<u32>,
    total_synth_count: usize,
}

impl WorkQueue {
    pub(crate) fn builder() -> WorkQueueBuilder {
        WorkQueueBuilder {
            items: Vec::new(),
            initially_runnable: Vec::new(),
            total_synth_count: 0,
        }
    }

    pub fn total_synth_count(&self) -> usize {
        self.total_synth_count
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn item(&self, index: u32) -> &QueueItem {
        &self.items[index as usize]
    }

    pub(crate) fn initially_runnable(&self) -> &[u32] {
        &self.initially_runnable
    }

    /// Resets every item's activation count to its limit, ahead of a fresh drain of
    /// the same queue (the queue itself is rebuilt only when the tree's topology
    /// changes, not every block).
    pub(crate) fn reset(&self) {
        for item in &self.items {
            item.reset();
        }
    }

    /// Propagates completion of `index` to its successors. Returns the successors
    /// that became runnable as a result.
    pub(crate) fn signal_finished(&self, index: u32) -> SmallVec<[u32; 4]> {
        let item = &self.items[index as usize];
        let mut newly_runnable = SmallVec::new();
        for &succ in item.successors.iter() {
            if self.items[succ as usize].decrement() {
                newly_runnable.push(succ);
            }
        }
        newly_runnable
    }
}

/// Accumulates items during one generator run; consumed into a [`WorkQueue`] once
/// the tree walk is complete. Not reused across rebuilds.
pub(crate) struct WorkQueueBuilder {
    items: Vec<QueueItem>,
    initially_runnable: Vec<u32>,
    total_synth_count: usize,
}

impl WorkQueueBuilder {
    /// Pool-allocates a new item and returns its index.
    pub(crate) fn allocate_item(
        &mut self,
        job: JobList,
        successors: SuccessorList,
        activation_limit: u32,
    ) -> crate::error::Result<u32> {
        self.total_synth_count += job.len();
        let job_handle = RtPool::allocate_job(job)?;
        let successors_handle = RtPool::allocate_successors(successors)?;
        let index = self.items.len() as u32;
        self.items
            .push(QueueItem::new(job_handle, successors_handle, activation_limit));
        if activation_limit == 0 {
            self.initially_runnable.push(index);
        }
        Ok(index)
    }

    pub(crate) fn finish(self) -> WorkQueue {
        WorkQueue {
            items: self.items,
            initially_runnable: self.initially_runnable,
            total_synth_count: self.total_synth_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt_pool::{RtPool as Pool, RtPoolCapacities};

    fn with_pool<R>(f: impl FnOnce() -> R) -> R {
        Pool::init(RtPoolCapacities {
            jobs: 64,
            successors: 64,
            scratch: 16,
        });
        let r = f();
        Pool::teardown();
        r
    }

    #[test]
    fn single_item_queue_is_initially_runnable() {
        with_pool(|| {
            let mut builder = WorkQueue::builder();
            let idx = builder
                .allocate_item(JobList::from_slice(&[1]), SuccessorList::new(), 0)
                .unwrap();
            let queue = builder.finish();
            assert_eq!(queue.initially_runnable(), &[idx]);
            assert_eq!(queue.total_synth_count(), 1);
        });
    }

    #[test]
    fn signal_finished_decrements_successor_exactly_once() {
        with_pool(|| {
            let mut builder = WorkQueue::builder();
            let tail = builder
                .allocate_item(JobList::from_slice(&[2]), SuccessorList::new(), 1)
                .unwrap();
            let head = builder
                .allocate_item(
                    JobList::from_slice(&[1]),
                    SuccessorList::from_slice(&[tail]),
                    0,
                )
                .unwrap();
            let queue = builder.finish();
            assert_eq!(queue.initially_runnable(), &[head]);
            let newly_runnable = queue.signal_finished(head);
            assert_eq!(&*newly_runnable, &[tail]);
        });
    }
}
