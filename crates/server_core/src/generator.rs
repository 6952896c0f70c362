//! The dependency-graph generator (component D, "the heart of the core"): a
//! tree-walk that compiles a node tree snapshot into a populated work queue.
//!
//! The originating algorithm streams pool allocations during a single reverse
//! (tail-to-head) walk, relying on raw successor pointers it can backfill as it
//! goes. Index-addressed successors make that backfill awkward without `unsafe`, so
//! this port splits the same algorithm into two passes instead: first a walk that
//! plans the full item graph (job packing, predecessor counts, successor edges) in
//! plain `Vec`s, then a second pass that draws every planned item from the real-time
//! pool now that its job, successors and activation limit are all simultaneously
//! known. The wiring rules themselves - sequential packing, satellite integration,
//! empty-group propagation - are unchanged.

use smallvec::{smallvec, SmallVec};

use crate::error::Result;
use crate::node_tree::{NodeEntry, NodeId, NodeKind, SatelliteRole, TreeSnapshot};
use crate::queue::{JobList, SuccessorList, WorkQueue};
use crate::rt_pool::RtPool;

struct PlannedItem {
    job: JobList,
    predecessor_count: u32,
    successors: SuccessorList,
}

/// What a single tree node (or a packed run of synth siblings) contributes to its
/// surroundings: the items that should receive activation from whatever precedes
/// it (`head`), and the items whose completion marks it as finished (`tail`).
///
/// Both empty means the node contributed nothing of its own - either it is a group
/// with no children, or (recursively) a group whose entire subtree resolved to
/// nothing. That is the trigger for the empty-group satellite propagation rule.
struct NodePlan {
    head: SmallVec<[u32; 2]>,
    tail: SmallVec<[u32; 2]>,
}

impl NodePlan {
    fn empty() -> Self {
        Self {
            head: SmallVec::new(),
            tail: SmallVec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }
}

enum Slot {
    /// A maximal run of adjacent sequential-group synth siblings, packed into one
    /// job. Only `run[0]` may carry a satellite predecessor; only `run[last]` may
    /// carry a satellite successor.
    Run(Vec<NodeId>),
    /// A single non-synth (group) child.
    Child(NodeId),
}

struct Generator<'a> {
    tree: &'a TreeSnapshot<'a>,
    planned: Vec<PlannedItem>,
}

/// Compiles `tree` into a freshly pool-allocated work queue.
pub fn generate(tree: &TreeSnapshot) -> Result<WorkQueue> {
    let mut gen = Generator {
        tree,
        planned: Vec::new(),
    };

    let root_plan = gen.compile_node_raw(tree.root)?;
    let mut pending_tail = None;
    let mut discarded_head = SmallVec::new();
    gen.integrate_satellites(tree.root, tree.root, root_plan, &mut pending_tail, &mut discarded_head)?;

    let mut builder = WorkQueue::builder();
    for item in gen.planned {
        builder.allocate_item(item.job, item.successors, item.predecessor_count)?;
    }
    let queue = builder.finish();

    #[cfg(debug_assertions)]
    validate_queue(&queue);

    Ok(queue)
}

impl<'a> Generator<'a> {
    fn node(&self, id: NodeId) -> &NodeEntry {
        &self.tree.nodes[&id]
    }

    fn is_synth(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Synth(_))
    }

    fn has_satellite_predecessor(&self, id: NodeId) -> bool {
        self.node(id).satellite_predecessors_head.is_some()
    }

    fn has_satellite_successor(&self, id: NodeId) -> bool {
        self.node(id).satellite_successors_head.is_some()
    }

    fn children_of(&self, group_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let group = match &self.node(group_id).kind {
            NodeKind::Group(g) => g,
            NodeKind::Synth(_) => return out,
        };
        let mut cur = group.children_head;
        while let Some(c) = cur {
            out.push(c);
            cur = self.node(c).next_sibling;
        }
        out
    }

    fn satellite_list(&self, reference: NodeId, role: SatelliteRole) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = match role {
            SatelliteRole::Predecessor => self.node(reference).satellite_predecessors_head,
            SatelliteRole::Successor => self.node(reference).satellite_successors_head,
        };
        while let Some(s) = cur {
            out.push(s);
            cur = self.node(s).next_satellite;
        }
        out
    }

    fn wire(&mut self, from_tails: &[u32], to_heads: &[u32]) {
        for &t in from_tails {
            for &h in to_heads {
                self.planned[t as usize].successors.push(h);
                self.planned[h as usize].predecessor_count += 1;
            }
        }
    }

    /// Compiles a node's own content (its job, or its children), without regard to
    /// satellites attached directly to this node. The caller is always in a
    /// position to integrate those (it alone knows whether there is a preceding
    /// tail to attach to, or whether they must be deferred to an external caller).
    fn compile_node_raw(&mut self, id: NodeId) -> Result<NodePlan> {
        match &self.node(id).kind {
            NodeKind::Synth(_) => self.compile_synth_run(&[id]),
            NodeKind::Group(g) if g.children_head.is_none() => {
                let _ = g;
                Ok(NodePlan::empty())
            }
            NodeKind::Group(g) if g.parallel => self.compile_parallel_group(id),
            NodeKind::Group(_) => self.compile_sequential_group(id),
        }
    }

    /// Packs `ids` into one job. The ids are first gathered into a pool-drawn
    /// scratch buffer rather than built up directly in the final `JobList`: the
    /// scratch buffer is sized for the worst case and reused allocation-free across
    /// a rebuild, whereas the final `JobList` is copied out only once its exact
    /// length is known and is itself pool-allocated a moment later.
    fn compile_synth_run(&mut self, ids: &[NodeId]) -> Result<NodePlan> {
        let mut scratch = RtPool::allocate_scratch()?;
        scratch.clear();
        scratch.extend(ids.iter().map(|n| n.0));
        let job: JobList = scratch.iter().copied().collect();
        drop(scratch);

        let idx = self.planned.len() as u32;
        self.planned.push(PlannedItem {
            job,
            predecessor_count: 0,
            successors: SuccessorList::new(),
        });
        Ok(NodePlan {
            head: smallvec![idx],
            tail: smallvec![idx],
        })
    }

    fn collect_slots(&self, group_id: NodeId) -> Vec<Slot> {
        let children = self.children_of(group_id);
        let mut slots = Vec::new();
        let mut i = 0usize;
        while i < children.len() {
            let id = children[i];
            if !self.is_synth(id) {
                slots.push(Slot::Child(id));
                i += 1;
                continue;
            }
            let mut run = vec![id];
            let mut j = i;
            loop {
                if self.has_satellite_successor(children[j]) {
                    j += 1;
                    break;
                }
                let next = j + 1;
                if next >= children.len()
                    || !self.is_synth(children[next])
                    || self.has_satellite_predecessor(children[next])
                {
                    j = next;
                    break;
                }
                run.push(children[next]);
                j = next;
            }
            slots.push(Slot::Run(run));
            i = j;
        }
        slots
    }

    /// Integrates the satellites attached directly to `predecessor_ref` /
    /// `successor_ref` (the same node, except for a packed synth run, where the
    /// predecessor lookup uses the run's head and the successor lookup uses its
    /// tail) into `own`, threading `pending_tail` (what the *next* slot should be
    /// wired from) and `group_head` (the slots never reached because nothing has
    /// produced a tail yet - deferred to whatever external caller wires this
    /// group's own head).
    fn integrate_satellites(
        &mut self,
        predecessor_ref: NodeId,
        successor_ref: NodeId,
        own: NodePlan,
        pending_tail: &mut Option<SmallVec<[u32; 2]>>,
        group_head: &mut SmallVec<[u32; 2]>,
    ) -> Result<()> {
        let satellite_predecessors = self.satellite_list(predecessor_ref, SatelliteRole::Predecessor);
        let satellite_successors = self.satellite_list(successor_ref, SatelliteRole::Successor);

        if own.is_empty() {
            // This position contributed no items of its own. Its satellite
            // successors still need an activation source (whatever precedes this
            // position); its satellite predecessors still count toward whatever
            // follows, propagating straight through rather than contributing zero.
            for sat in &satellite_successors {
                let sat_plan = self.compile_node_raw(*sat)?;
                let mut sat_pending = None;
                let mut sat_head = SmallVec::new();
                self.integrate_satellites(*sat, *sat, sat_plan, &mut sat_pending, &mut sat_head)?;
                match pending_tail.clone() {
                    Some(pt) => self.wire(&pt, &sat_head),
                    None => group_head.extend(sat_head),
                }
            }

            let mut predecessor_tails: SmallVec<[u32; 2]> = SmallVec::new();
            for sat in &satellite_predecessors {
                let sat_plan = self.compile_node_raw(*sat)?;
                let mut sat_pending = None;
                let mut sat_head = SmallVec::new();
                self.integrate_satellites(*sat, *sat, sat_plan, &mut sat_pending, &mut sat_head)?;
                predecessor_tails.extend(sat_pending.unwrap_or_default());
            }
            if !predecessor_tails.is_empty() {
                *pending_tail = Some(predecessor_tails);
            }
            // else: transparent - this empty position is invisible, `pending_tail`
            // is left exactly as the previous (real) position set it.
            return Ok(());
        }

        match pending_tail.clone() {
            Some(pt) => self.wire(&pt, &own.head),
            None => group_head.extend(own.head.iter().copied()),
        }
        for sat in &satellite_predecessors {
            let sat_plan = self.compile_node(*sat)?;
            self.wire(&sat_plan.tail, &own.head);
        }
        for sat in &satellite_successors {
            let sat_plan = self.compile_node(*sat)?;
            self.wire(&own.tail, &sat_plan.head);
        }
        *pending_tail = Some(own.tail.clone());
        Ok(())
    }

    /// Compiles a node together with its own direct satellites (used when
    /// recursing into a satellite's subtree, which is never itself a slot in some
    /// outer sequential group's child list).
    fn compile_node(&mut self, id: NodeId) -> Result<NodePlan> {
        let own = self.compile_node_raw(id)?;
        let mut pending_tail = None;
        let mut head = SmallVec::new();
        self.integrate_satellites(id, id, own, &mut pending_tail, &mut head)?;
        let tail = pending_tail.unwrap_or_default();
        Ok(NodePlan { head, tail })
    }

    fn compile_sequential_group(&mut self, group_id: NodeId) -> Result<NodePlan> {
        let slots = self.collect_slots(group_id);
        let mut pending_tail = None;
        let mut group_head = SmallVec::new();

        for slot in slots {
            match slot {
                Slot::Run(ids) => {
                    let own = self.compile_synth_run(&ids)?;
                    let head_ref = ids[0];
                    let tail_ref = *ids.last().unwrap();
                    self.integrate_satellites(head_ref, tail_ref, own, &mut pending_tail, &mut group_head)?;
                }
                Slot::Child(id) => {
                    let own = self.compile_node_raw(id)?;
                    self.integrate_satellites(id, id, own, &mut pending_tail, &mut group_head)?;
                }
            }
        }

        Ok(NodePlan {
            head: group_head,
            tail: pending_tail.unwrap_or_default(),
        })
    }

    fn compile_parallel_group(&mut self, group_id: NodeId) -> Result<NodePlan> {
        let children = self.children_of(group_id);
        let mut head = SmallVec::new();
        let mut tail = SmallVec::new();
        for id in children {
            let own = self.compile_node_raw(id)?;
            let mut local_pending = None;
            let mut local_head = SmallVec::new();
            self.integrate_satellites(id, id, own, &mut local_pending, &mut local_head)?;
            head.extend(local_head);
            if let Some(pt) = local_pending {
                tail.extend(pt);
            }
        }
        Ok(NodePlan { head, tail })
    }
}

/// Debug-only post-validation: every item must be reachable from the
/// initially-runnable set by following successor edges exactly once per
/// predecessor, and the sum of job sizes must match the queue's reported synth
/// count. A violation here is a generator bug, not a caller error.
#[cfg(debug_assertions)]
fn validate_queue(queue: &WorkQueue) {
    let n = queue.item_count();
    let mut remaining: Vec<u32> = (0..n as u32).map(|i| queue.item(i).activation_limit()).collect();
    let mut stack: Vec<u32> = queue.initially_runnable().to_vec();
    let mut visited = vec![false; n];
    let mut visited_count = 0usize;

    while let Some(idx) = stack.pop() {
        if visited[idx as usize] {
            continue;
        }
        visited[idx as usize] = true;
        visited_count += 1;
        for &succ in queue.item(idx).successors() {
            remaining[succ as usize] = remaining[succ as usize]
                .checked_sub(1)
                .expect("successor activation count underflowed: duplicate or cyclic edge");
            if remaining[succ as usize] == 0 {
                stack.push(succ);
            }
        }
    }

    debug_assert_eq!(
        visited_count, n,
        "not every queue item is reachable from the initially-runnable set"
    );

    let total_synths: usize = (0..n as u32).map(|i| queue.item(i).job().len()).sum();
    debug_assert_eq!(total_synths, queue.total_synth_count());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_tree::{NewNodeKind, Placement, Position, ServerTree};
    use crate::rt_pool::{RtPool, RtPoolCapacities};
    use proptest::prelude::*;

    fn noop() -> Box<dyn FnMut(&mut [f32]) + Send + Sync> {
        Box::new(|_: &mut [f32]| {})
    }

    fn with_pool<R>(f: impl FnOnce() -> R) -> R {
        RtPool::init(RtPoolCapacities {
            jobs: 64,
            successors: 64,
            scratch: 16,
        });
        let r = f();
        RtPool::teardown();
        r
    }

    fn tail(tree: &ServerTree) -> Position {
        Position {
            reference: tree.root(),
            placement: Placement::Tail,
        }
    }

    #[test]
    fn single_synth_is_one_initially_runnable_item() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(NodeId(1), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();
            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 1);
            assert_eq!(queue.initially_runnable().len(), 1);
            assert_eq!(queue.total_synth_count(), 1);
        });
    }

    #[test]
    fn sequential_chain_packs_into_one_item() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            for id in [1, 2, 3] {
                tree.add(NodeId(id), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();
            }
            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 1);
            assert_eq!(queue.item(0).job(), &[1, 2, 3]);
            assert_eq!(queue.initially_runnable(), &[0]);
        });
    }

    #[test]
    fn satellite_predecessor_gates_reference_node() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(NodeId(1000), NewNodeKind::Synth(noop()), tail(&tree))
                .unwrap();
            tree.add(
                NodeId(1001),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteBefore,
                },
            )
            .unwrap();
            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 2);
            // Exactly one item (the satellite) is initially runnable; the other
            // (the reference synth) must wait on it.
            assert_eq!(queue.initially_runnable().len(), 1);
            let runnable_idx = queue.initially_runnable()[0];
            assert_eq!(queue.item(runnable_idx).job(), &[1001]);
            let other_idx = 1 - runnable_idx;
            assert_eq!(queue.item(other_idx).activation_limit(), 1);
        });
    }

    #[test]
    fn parallel_group_children_share_activation_and_are_independent() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(
                NodeId(1),
                NewNodeKind::Group { parallel: true },
                tail(&tree),
            )
            .unwrap();
            for id in [2, 3, 4] {
                tree.add(
                    NodeId(id),
                    NewNodeKind::Synth(noop()),
                    Position {
                        reference: NodeId(1),
                        placement: Placement::Insert,
                    },
                )
                .unwrap();
            }
            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 3);
            assert_eq!(queue.initially_runnable().len(), 3);
            for idx in 0..3u32 {
                assert_eq!(queue.item(idx).activation_limit(), 0);
            }
        });
    }

    #[test]
    fn empty_group_satellite_predecessor_propagates_to_next_sibling() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(
                NodeId(1),
                NewNodeKind::Group { parallel: false },
                tail(&tree),
            )
            .unwrap();
            tree.add(
                NodeId(2),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1),
                    placement: Placement::SatelliteBefore,
                },
            )
            .unwrap();
            tree.add(NodeId(3), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();

            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 2);
            assert_eq!(queue.initially_runnable().len(), 1);
            let runnable = queue.item(queue.initially_runnable()[0]);
            assert_eq!(runnable.job(), &[2]);
            let other = 1 - queue.initially_runnable()[0];
            assert_eq!(queue.item(other).job(), &[3]);
            assert_eq!(queue.item(other).activation_limit(), 1);
        });
    }

    #[test]
    fn mixed_real_and_satellite_predecessors_and_successors() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(NodeId(1000), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();
            tree.add(
                NodeId(999),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::Before,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1001),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::After,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1009),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteBefore,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1011),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteAfter,
                },
            )
            .unwrap();

            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), 5);
            assert_eq!(queue.total_synth_count(), 5);
            assert_eq!(queue.initially_runnable().len(), 2);

            let idx_of = |id: i32| {
                (0..queue.item_count() as u32)
                    .find(|&i| queue.item(i).job().contains(&id))
                    .unwrap()
            };
            let s2 = idx_of(999);
            let sat1 = idx_of(1009);
            let s1 = idx_of(1000);
            let s3 = idx_of(1001);
            let sat2 = idx_of(1011);

            assert_eq!(queue.item(s2).activation_limit(), 0);
            assert_eq!(queue.item(sat1).activation_limit(), 0);
            assert_eq!(queue.item(s1).activation_limit(), 2);
            assert_eq!(queue.item(s3).activation_limit(), 1);
            assert_eq!(queue.item(sat2).activation_limit(), 1);

            assert!(queue.signal_finished(s2).is_empty());
            let after_sat1 = queue.signal_finished(sat1);
            assert_eq!(&*after_sat1, &[s1]);

            let mut after_s1 = queue.signal_finished(s1).to_vec();
            after_s1.sort();
            let mut expected = [s3, sat2];
            expected.sort();
            assert_eq!(after_s1, expected);
        });
    }

    #[test]
    fn non_empty_group_with_neighbors_and_satellites_packs_children_but_not_across_the_group() {
        with_pool(|| {
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(
                NodeId(1000),
                NewNodeKind::Group { parallel: false },
                tail(&tree),
            )
            .unwrap();
            tree.add(
                NodeId(2000),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::Insert,
                },
            )
            .unwrap();
            tree.add(
                NodeId(2001),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::Insert,
                },
            )
            .unwrap();
            tree.add(
                NodeId(999),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::Before,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1001),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::After,
                },
            )
            .unwrap();
            tree.add(
                NodeId(1900),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteBefore,
                },
            )
            .unwrap();
            tree.add(
                NodeId(2100),
                NewNodeKind::Synth(noop()),
                Position {
                    reference: NodeId(1000),
                    placement: Placement::SatelliteAfter,
                },
            )
            .unwrap();

            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            // s1a and s1b still pack into one item (their own run has no satellites),
            // giving 5 items total for the 6 synths: s2, [s1a, s1b], s3, sat1, sat2.
            assert_eq!(queue.item_count(), 5);
            assert_eq!(queue.total_synth_count(), 6);

            let idx_of = |id: i32| {
                (0..queue.item_count() as u32)
                    .find(|&i| queue.item(i).job().contains(&id))
                    .unwrap()
            };
            let s2 = idx_of(999);
            let sat1 = idx_of(1900);
            let group_head = idx_of(2000);
            let group_tail = idx_of(2001);
            let s3 = idx_of(1001);
            let sat2 = idx_of(2100);

            // The group's two children share a single packed item.
            assert_eq!(group_head, group_tail);
            assert_eq!(queue.item(group_head).job(), &[2000, 2001]);

            assert_eq!(queue.item(s2).activation_limit(), 0);
            assert_eq!(queue.item(sat1).activation_limit(), 0);
            // The group's head is gated on both its real and satellite predecessor.
            assert_eq!(queue.item(group_head).activation_limit(), 2);
            // s3 and sat2 depend only on the group's tail (same item as its head here).
            assert_eq!(queue.item(s3).activation_limit(), 1);
            assert_eq!(queue.item(sat2).activation_limit(), 1);

            assert!(queue.signal_finished(s2).is_empty());
            let after_sat1 = queue.signal_finished(sat1);
            assert_eq!(&*after_sat1, &[group_head]);

            let mut after_group = queue.signal_finished(group_head).to_vec();
            after_group.sort();
            let mut expected = [s3, sat2];
            expected.sort();
            assert_eq!(after_group, expected);
        });
    }

    #[test]
    fn parallel_group_successor_activation_equals_group_size() {
        with_pool(|| {
            let n: i32 = 4;
            let mut tree = ServerTree::new(NodeId(0));
            tree.add(NodeId(100), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();
            tree.add(
                NodeId(1),
                NewNodeKind::Group { parallel: true },
                tail(&tree),
            )
            .unwrap();
            for id in 200..200 + n {
                tree.add(
                    NodeId(id),
                    NewNodeKind::Synth(noop()),
                    Position {
                        reference: NodeId(1),
                        placement: Placement::Insert,
                    },
                )
                .unwrap();
            }
            tree.add(NodeId(300), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();

            let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
            assert_eq!(queue.item_count(), n as usize + 2);
            assert_eq!(queue.total_synth_count(), n as usize + 2);

            let idx_of = |id: i32| {
                (0..queue.item_count() as u32)
                    .find(|&i| queue.item(i).job().contains(&id))
                    .unwrap()
            };
            let p = idx_of(100);
            let q = idx_of(300);
            let children: Vec<u32> = (200..200 + n).map(idx_of).collect();

            assert_eq!(queue.item(p).activation_limit(), 0);
            assert_eq!(queue.item(q).activation_limit(), n as u32);
            for &child in &children {
                assert_eq!(queue.item(child).activation_limit(), 1);
            }

            // p unblocks every child at once; p itself has no predecessor to wait on.
            let mut unblocked_by_p = queue.signal_finished(p).to_vec();
            unblocked_by_p.sort();
            let mut expected_children = children.clone();
            expected_children.sort();
            assert_eq!(unblocked_by_p, expected_children);

            // q only becomes runnable once every child has finished.
            for &child in &children[..children.len() - 1] {
                assert!(queue.signal_finished(child).is_empty());
            }
            let last = *children.last().unwrap();
            assert_eq!(&*queue.signal_finished(last), &[q]);
        });
    }

    proptest::proptest! {
        /// A chain of N satellite-free synths under the root, in tree order, packs
        /// into exactly one item carrying all N ids in order, and the queue accounts
        /// for exactly N synths total.
        #[test]
        fn sequential_chain_of_any_length_packs_into_one_item(n in 1usize..40) {
            with_pool(|| {
                let mut tree = ServerTree::new(NodeId(0));
                for id in 1..=n as i32 {
                    tree.add(NodeId(id), NewNodeKind::Synth(noop()), tail(&tree)).unwrap();
                }
                let queue = generate(&tree.snapshot_for_scheduling()).unwrap();
                prop_assert_eq!(queue.item_count(), 1);
                prop_assert_eq!(queue.total_synth_count(), n);
                let expected: Vec<i32> = (1..=n as i32).collect();
                prop_assert_eq!(queue.item(0).job(), &expected[..]);
                Ok(())
            })?;
        }
    }
}
