//! Control command intake (component F): non-RT threads submit typed mutations,
//! the helper thread drains and applies them between blocks.
//!
//! Mutations are plain structs assembled into one tagged enum with the crate's
//! existing `variant!` macro, the same way the teacher assembles its own command
//! payload types — this crate has no wire format of its own; an OSC front end or
//! other transport decodes onto these types externally.

use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::queue::SegQueue;

use crate::error::Result;
use crate::node_tree::{NewNodeKind, NodeId, Position, ServerTree, Slot, Value};

pub struct NodeNewSynth {
    pub id: NodeId,
    pub process: Box<dyn FnMut(&mut [f32]) + Send + Sync>,
    pub position: Position,
}

pub struct NodeNewGroup {
    pub id: NodeId,
    pub parallel: bool,
    pub position: Position,
}

pub struct NodeFree {
    pub id: NodeId,
}

pub struct NodeSet {
    pub id: NodeId,
    pub slot: Slot,
    pub value: Value,
}

pub struct NodeRun {
    pub id: NodeId,
    pub running: bool,
}

pub struct GroupFreeAll {
    pub id: NodeId,
}

variant!(pub Mutation, NodeNewSynth, NodeNewGroup, NodeFree, NodeSet, NodeRun, GroupFreeAll);

impl Mutation {
    /// Whether applying this mutation can change which nodes exist or how they are
    /// wired together, as opposed to merely touching a parameter or a running flag.
    /// Only topology-changing mutations force a queue rebuild.
    fn changes_topology(&self) -> bool {
        !matches!(self, Mutation::NodeSetV(_) | Mutation::NodeRunV(_))
    }
}

fn apply(mutation: Mutation, tree: &mut ServerTree) -> Result<()> {
    match mutation {
        Mutation::NodeNewSynthV(cmd) => tree.add(cmd.id, NewNodeKind::Synth(cmd.process), cmd.position),
        Mutation::NodeNewGroupV(cmd) => tree.add(
            cmd.id,
            NewNodeKind::Group { parallel: cmd.parallel },
            cmd.position,
        ),
        Mutation::NodeFreeV(cmd) => tree.remove(cmd.id),
        Mutation::NodeSetV(cmd) => tree.set(cmd.id, cmd.slot, cmd.value),
        Mutation::NodeRunV(cmd) => {
            if cmd.running {
                tree.resume(cmd.id)
            } else {
                tree.pause(cmd.id)
            }
        }
        Mutation::GroupFreeAllV(cmd) => tree.free_all_children(cmd.id),
    }
}

struct QueuedMutation {
    mutation: Mutation,
    result: Sender<Result<()>>,
}

/// A wait-free MPSC intake queue: any number of non-RT threads submit mutations,
/// exactly one helper thread drains them.
///
/// `crossbeam::queue::SegQueue` allocates on push, which is fine here — push only
/// ever happens from non-RT threads. Draining and applying happens on the helper
/// thread between blocks, never during one.
pub struct CommandIntake {
    queue: SegQueue<QueuedMutation>,
}

impl Default for CommandIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandIntake {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Enqueues `mutation` and returns a channel that will receive its result once
    /// the helper thread has applied it. Dropping the receiver without reading it
    /// is fine; the send is best-effort.
    pub fn submit(&self, mutation: impl Into<Mutation>) -> Receiver<Result<()>> {
        let (tx, rx) = bounded(1);
        self.queue.push(QueuedMutation {
            mutation: mutation.into(),
            result: tx,
        });
        rx
    }

    /// Applies every pending mutation, in arrival order, to `tree`. Returns whether
    /// any applied mutation changed topology, which the caller should treat as "the
    /// work queue must be rebuilt before the next block."
    pub(crate) fn drain_into(&self, tree: &mut ServerTree) -> bool {
        let mut dirty = false;
        while let Some(queued) = self.queue.pop() {
            let topology_changing = queued.mutation.changes_topology();
            let result = apply(queued.mutation, tree);
            if result.is_ok() && topology_changing {
                dirty = true;
            }
            // The submitter may have stopped listening; that's not our problem.
            let _ = queued.result.send(result);
        }
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_tree::Placement;

    fn root_tail() -> Position {
        Position {
            reference: NodeId(0),
            placement: Placement::Tail,
        }
    }

    #[test]
    fn synth_creation_is_applied_and_reports_success() {
        let mut tree = ServerTree::new(NodeId(0));
        let intake = CommandIntake::new();
        let rx = intake.submit(NodeNewSynth {
            id: NodeId(1),
            process: Box::new(|_: &mut [f32]| {}),
            position: root_tail(),
        });
        let dirty = intake.drain_into(&mut tree);
        assert!(dirty);
        rx.recv().unwrap().unwrap();
        assert_eq!(tree.synth_count(), 1);
    }

    #[test]
    fn parameter_set_does_not_mark_topology_dirty() {
        let mut tree = ServerTree::new(NodeId(0));
        tree.add(
            NodeId(1),
            NewNodeKind::Synth(Box::new(|_: &mut [f32]| {})),
            root_tail(),
        )
        .unwrap();

        let intake = CommandIntake::new();
        let rx = intake.submit(NodeSet {
            id: NodeId(1),
            slot: Slot::Index(0),
            value: Value::Scalar(1.0),
        });
        let dirty = intake.drain_into(&mut tree);
        assert!(!dirty);
        rx.recv().unwrap().unwrap();
    }

    #[test]
    fn failed_mutation_reports_error_and_does_not_mark_dirty() {
        let mut tree = ServerTree::new(NodeId(0));
        let intake = CommandIntake::new();
        let rx = intake.submit(NodeFree { id: NodeId(404) });
        let dirty = intake.drain_into(&mut tree);
        assert!(!dirty);
        assert!(rx.recv().unwrap().is_err());
    }
}
