//! The embedding-host-facing entry point: ties the node tree (B), the work queue
//! (C), the generator (D), the worker pool (E) and command intake (F) together into
//! one type a host drives one block at a time.

use crate::command::CommandIntake;
use crate::error::Result;
use crate::generator::generate;
use crate::node_tree::{NodeId, ServerTree};
use crate::queue::WorkQueue;
use crate::rt_pool::{RtPool, RtPoolCapacities};
use crate::worker_pool::{drain_block, WorkerPool};

/// A running server instance.
///
/// Construction calls [`RtPool::init`] and [`WorkerPool::init`]; the caller must
/// eventually consume `self` through [`Server::shutdown`] once the tree has been
/// emptied, which tears both pools back down. Dropping a `Server` without calling
/// `shutdown` leaves the process-wide pools initialized — harmless if the process is
/// exiting, a leak otherwise.
pub struct Server {
    tree: ServerTree,
    queue: WorkQueue,
    intake: CommandIntake,
    worker_count: usize,
}

impl Server {
    /// Creates a server with an empty tree rooted at `root`, using `capacities` for
    /// the real-time pool and `worker_count` DSP worker threads (in addition to the
    /// calling thread, which doubles as the helper).
    pub fn new(root: NodeId, capacities: RtPoolCapacities, worker_count: usize) -> Result<Self> {
        crate::logging::ensure_log_ctx();
        // The constructing thread becomes the helper thread: the one thread in the RT
        // domain permitted to mutate the tree and allocate from the RT pool outside of
        // a block's drain (where each worker marks itself independently).
        crate::is_audio_thread::mark_audio_thread();
        RtPool::init(capacities);
        WorkerPool::init(worker_count);
        let tree = ServerTree::new(root);
        let queue = generate(&tree.snapshot_for_scheduling())?;
        Ok(Self {
            tree,
            queue,
            intake: CommandIntake::new(),
            worker_count,
        })
    }

    /// Convenience constructor using the crate's default pool capacities and
    /// `cores - 1` worker threads.
    pub fn with_defaults(root: NodeId) -> Result<Self> {
        Self::new(
            root,
            RtPoolCapacities::default(),
            crate::config::default_worker_count(),
        )
    }

    /// The queue through which non-RT threads submit mutations to this server's
    /// tree. Cloneable senders aren't needed: `&CommandIntake` is itself `Sync` and
    /// may be shared across any number of submitting threads.
    pub fn commands(&self) -> &CommandIntake {
        &self.intake
    }

    /// Applies any mutations submitted since the last block, rebuilding the work
    /// queue first if one of them changed topology, then drains one block's worth
    /// of work into `block`, invoking each scheduled synth's own DSP closure
    /// (skipping paused ones). Must be called from the helper thread only.
    pub fn run_block(&mut self, block: &mut [f32]) -> Result<()> {
        let dirty = self.intake.drain_into(&mut self.tree);
        if dirty {
            match generate(&self.tree.snapshot_for_scheduling()) {
                Ok(fresh) => self.queue = fresh,
                Err(err @ crate::error::Error::PoolExhausted { .. }) => {
                    // Transient resource error: abandon this rebuild, keep draining the
                    // previous queue against the (now slightly stale) tree, and retry
                    // the rebuild next tick rather than failing the block outright.
                    rt_warn!("work queue rebuild abandoned: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        let tree = &self.tree;
        drain_block(&self.queue, self.worker_count, block, move |id, block| {
            tree.run_synth(NodeId(id), block)
        });
        Ok(())
    }

    /// Empties the tree and tears down the real-time pool. Consumes `self`; there is
    /// no way to keep running a `Server` after this returns.
    pub fn shutdown(mut self) -> Result<()> {
        self.tree.free_all_children(self.tree.root())?;
        WorkerPool::teardown();
        RtPool::teardown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_tree::{Placement, Position};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn add_synth_then_run_a_block_then_shut_down() {
        let mut server = Server::new(
            NodeId(0),
            RtPoolCapacities {
                jobs: 32,
                successors: 32,
                scratch: 8,
            },
            1,
        )
        .unwrap();

        let ran = Arc::new(AtomicU32::new(0));
        let ran_in_synth = Arc::clone(&ran);
        server
            .commands()
            .submit(crate::command::NodeNewSynth {
                id: NodeId(1),
                process: Box::new(move |_: &mut [f32]| {
                    ran_in_synth.fetch_add(1, Ordering::Relaxed);
                }),
                position: Position {
                    reference: NodeId(0),
                    placement: Placement::Tail,
                },
            })
            .recv()
            .unwrap()
            .unwrap();

        let mut block = [0.0f32; 16];
        server.run_block(&mut block).unwrap();
        assert_eq!(ran.load(Ordering::Relaxed), 1);

        server.shutdown().unwrap();
    }

    #[test]
    fn pausing_a_synth_suppresses_its_execution() {
        let mut server = Server::new(
            NodeId(0),
            RtPoolCapacities {
                jobs: 32,
                successors: 32,
                scratch: 8,
            },
            1,
        )
        .unwrap();

        let ran = Arc::new(AtomicU32::new(0));
        let ran_in_synth = Arc::clone(&ran);
        server
            .commands()
            .submit(crate::command::NodeNewSynth {
                id: NodeId(1),
                process: Box::new(move |_: &mut [f32]| {
                    ran_in_synth.fetch_add(1, Ordering::Relaxed);
                }),
                position: Position {
                    reference: NodeId(0),
                    placement: Placement::Tail,
                },
            })
            .recv()
            .unwrap()
            .unwrap();
        server
            .commands()
            .submit(crate::command::NodeRun {
                id: NodeId(1),
                running: false,
            })
            .recv()
            .unwrap()
            .unwrap();

        let mut block = [0.0f32; 16];
        server.run_block(&mut block).unwrap();
        assert_eq!(ran.load(Ordering::Relaxed), 0);

        server.shutdown().unwrap();
    }
}
