//! The hierarchical tree of synths and groups.
//!
//! This module owns node identity, parent/child ordering, and the lateral
//! "satellite" relations. It is mutated exclusively by the helper thread (see
//! `crate::command`); workers only ever see an immutable snapshot produced by
//! `crate::generator` from `ServerTree::snapshot_for_scheduling`.
//!
//! Node identity is an externally supplied integer (the caller picks it, typically
//! mirroring an OSC node id), so the tree is addressed by a `HashMap<NodeId, _>`
//! rather than a densely packed arena. Parent/child and satellite lists are kept as
//! explicit `prev`/`next` `NodeId` links inside each node, the index-addressed
//! analogue of the originating system's intrusive linked lists: unlinking a node is
//! still `O(1)` and never touches the heap, but there is no raw pointer chasing.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A node identity, supplied by the caller and unique among live nodes.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct NodeId(pub i32);

/// Where a parameter lives on a synth: a bounded numeric index, or an open name.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Slot {
    Index(u32),
    Name(Box<str>),
}

/// A parameter value: one float, or a short run of them.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(f32),
    Array(smallvec::SmallVec<[f32; 8]>),
}

/// The wire encoding for where a new node is placed relative to a reference node.
///
/// This mapping is load-bearing: it mirrors the originating `node_position` enum
/// exactly and must not be renumbered.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Placement {
    Head = 0,
    Tail = 1,
    Before = 2,
    After = 3,
    Replace = 4,
    Insert = 5,
    SatelliteBefore = 6,
    SatelliteAfter = 7,
}

/// A placement instruction: insert relative to `reference`.
#[derive(Copy, Clone, Debug)]
pub struct Position {
    pub reference: NodeId,
    pub placement: Placement,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SatelliteRole {
    Predecessor,
    Successor,
}

/// What kind of node to create, passed to `ServerTree::add`.
pub enum NewNodeKind {
    Synth(Box<dyn FnMut(&mut [f32]) + Send + Sync>),
    Group { parallel: bool },
}

pub(crate) struct SynthNode {
    /// The synth's own DSP closure, reached through `&self` by `ServerTree::run_synth`
    /// while other workers may concurrently reach other nodes' closures the same way.
    /// `UnsafeCell` is what makes that legal: it is guaranteed to share its inner
    /// type's layout, so a `&UnsafeCell<Box<dyn FnMut(..)>>` can be formed from a
    /// shared borrow without ever claiming there is only one reader, and a raw
    /// pointer into it can be taken without first manufacturing a `&mut` out of
    /// thin air. See `crate::audio_synchronization`'s `concurrent_slab::SlabElement`
    /// for the same `MaybeUninit<UnsafeCell<T>>` shape used for the same reason:
    /// "guarded by the exclusive handle" there is this crate's "guarded by the work
    /// queue's exactly-once activation" here.
    pub(crate) process: std::cell::UnsafeCell<Box<dyn FnMut(&mut [f32]) + Send + Sync>>,
    pub(crate) params: HashMap<Slot, Value>,
}

// SAFETY: `UnsafeCell` makes `SynthNode` `!Sync` by default. It is restored here
// because every caller that actually dereferences `process` concurrently
// (`ServerTree::run_synth`) does so under the work queue's own exactly-once
// guarantee: a given id is looked up by at most one worker per block, and the tree
// is never mutated while a block is draining. See `concurrent_slab::SlabElement`
// for the identical justification on an identical shape.
unsafe impl Sync for SynthNode {}

pub(crate) struct GroupNode {
    pub(crate) parallel: bool,
    pub(crate) children_head: Option<NodeId>,
    pub(crate) children_tail: Option<NodeId>,
    pub(crate) child_count: usize,
}

pub(crate) enum NodeKind {
    Synth(SynthNode),
    Group(GroupNode),
}

pub(crate) struct NodeEntry {
    pub(crate) id: NodeId,
    pub(crate) running: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) prev_sibling: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    pub(crate) satellite_of: Option<(NodeId, SatelliteRole)>,
    pub(crate) prev_satellite: Option<NodeId>,
    pub(crate) next_satellite: Option<NodeId>,
    pub(crate) satellite_predecessors_head: Option<NodeId>,
    pub(crate) satellite_successors_head: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

impl NodeEntry {
    fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            running: true,
            parent: None,
            prev_sibling: None,
            next_sibling: None,
            satellite_of: None,
            prev_satellite: None,
            next_satellite: None,
            satellite_predecessors_head: None,
            satellite_successors_head: None,
            kind,
        }
    }

    pub(crate) fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    fn as_group(&self) -> Option<&GroupNode> {
        match &self.kind {
            NodeKind::Group(g) => Some(g),
            NodeKind::Synth(_) => None,
        }
    }

    fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match &mut self.kind {
            NodeKind::Group(g) => Some(g),
            NodeKind::Synth(_) => None,
        }
    }
}

/// A batch of nodes unlinked from the tree in one operation, handed to the
/// background-drop worker so that arbitrary user parameter values and DSP closures
/// never run their destructors on the helper thread.
pub(crate) struct RetiredNodes(pub(crate) Vec<NodeEntry>);

unsafe impl Send for RetiredNodes {}
unsafe impl Sync for RetiredNodes {}

/// Read-only view of the tree handed to the generator. The helper thread guarantees
/// the tree is quiescent (not being mutated) for the duration of a snapshot, so this
/// is a plain borrow rather than a copy.
pub struct TreeSnapshot<'a> {
    pub(crate) nodes: &'a HashMap<NodeId, NodeEntry>,
    pub(crate) root: NodeId,
}

pub struct ServerTree {
    nodes: HashMap<NodeId, NodeEntry>,
    root: NodeId,
    synth_count: usize,
}

impl ServerTree {
    pub fn new(root: NodeId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeEntry::new(
                root,
                NodeKind::Group(GroupNode {
                    parallel: false,
                    children_head: None,
                    children_tail: None,
                    child_count: 0,
                }),
            ),
        );
        Self {
            nodes,
            root,
            synth_count: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn synth_count(&self) -> usize {
        self.synth_count
    }

    pub fn snapshot_for_scheduling(&self) -> TreeSnapshot<'_> {
        TreeSnapshot {
            nodes: &self.nodes,
            root: self.root,
        }
    }

    /// Invokes `id`'s own DSP closure against `block`, unless the node is paused or
    /// no longer present. A no-op for group ids.
    ///
    /// Takes `&self` rather than `&mut self` so every worker can call this
    /// concurrently for the synths its jobs contain. Soundness rests on the work
    /// queue's own exactly-once guarantee (`crate::queue`): a given id is looked up
    /// here at most once per block, by at most one worker, so two threads never race
    /// on the same closure. The tree itself is never mutated while a block is being
    /// drained - mutations only happen on the helper thread, strictly between blocks
    /// - so this is never racing an `add`/`remove`/`set` either.
    pub(crate) fn run_synth(&self, id: NodeId, block: &mut [f32]) {
        let entry = match self.nodes.get(&id) {
            Some(e) => e,
            None => return,
        };
        if !entry.running {
            return;
        }
        if let NodeKind::Synth(synth) = &entry.kind {
            // SAFETY: `UnsafeCell::get` never itself conjures a `&mut` - it hands
            // back the raw pointer the cell already owns. See the method doc above
            // for why it's sound to dereference it here: at most one thread at a
            // time reaches this particular id's closure during a given block.
            let process = synth.process.get();
            unsafe { (*process)(block) };
        }
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(&id).ok_or(Error::UnknownNode { id: id.0 })
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes
            .get_mut(&id)
            .ok_or(Error::UnknownNode { id: id.0 })
    }

    pub fn add(&mut self, id: NodeId, kind: NewNodeKind, position: Position) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateId { id: id.0 });
        }
        // Validate the reference node exists before doing anything else.
        self.entry(position.reference)?;

        let is_synth = matches!(kind, NewNodeKind::Synth(_));
        let node_kind = match kind {
            NewNodeKind::Synth(process) => {
                if !is_synth {
                    unreachable!()
                }
                NodeKind::Synth(SynthNode {
                    process: std::cell::UnsafeCell::new(process),
                    params: HashMap::new(),
                })
            }
            NewNodeKind::Group { parallel } => NodeKind::Group(GroupNode {
                parallel,
                children_head: None,
                children_tail: None,
                child_count: 0,
            }),
        };

        match position.placement {
            Placement::Head => self.insert_as_child(id, node_kind, position.reference, true)?,
            Placement::Tail => self.insert_as_child(id, node_kind, position.reference, false)?,
            Placement::Before => self.insert_as_sibling(id, node_kind, position.reference, true)?,
            Placement::After => {
                self.insert_as_sibling(id, node_kind, position.reference, false)?
            }
            Placement::Insert => {
                let reference_is_parallel = self
                    .entry(position.reference)?
                    .as_group()
                    .map(|g| g.parallel)
                    .unwrap_or(false);
                if !reference_is_parallel {
                    return Err(Error::BadPlacement {
                        placement: position.placement,
                    });
                }
                self.insert_as_child(id, node_kind, position.reference, false)?
            }
            Placement::Replace => self.replace(id, node_kind, position.reference)?,
            Placement::SatelliteBefore => {
                self.insert_as_satellite(id, node_kind, position.reference, SatelliteRole::Predecessor)?
            }
            Placement::SatelliteAfter => {
                self.insert_as_satellite(id, node_kind, position.reference, SatelliteRole::Successor)?
            }
        }

        if is_synth {
            self.synth_count += 1;
        }
        Ok(())
    }

    fn insert_as_child(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        parent: NodeId,
        at_head: bool,
    ) -> Result<()> {
        if !self.entry(parent)?.is_group() {
            return Err(Error::BadPlacement {
                placement: if at_head {
                    Placement::Head
                } else {
                    Placement::Tail
                },
            });
        }
        self.nodes.insert(id, NodeEntry::new(id, kind));
        if at_head {
            self.group_push_front(parent, id);
        } else {
            self.group_push_back(parent, id);
        }
        Ok(())
    }

    fn insert_as_sibling(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        reference: NodeId,
        before: bool,
    ) -> Result<()> {
        let parent = self.entry(reference)?.parent.ok_or(Error::BadPlacement {
            placement: if before {
                Placement::Before
            } else {
                Placement::After
            },
        })?;
        self.nodes.insert(id, NodeEntry::new(id, kind));
        if before {
            self.insert_before_sibling(reference, id);
        } else {
            self.insert_after_sibling(reference, id);
        }
        let _ = parent;
        Ok(())
    }

    fn insert_as_satellite(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        reference: NodeId,
        role: SatelliteRole,
    ) -> Result<()> {
        self.entry(reference)?;
        self.nodes.insert(id, NodeEntry::new(id, kind));
        self.satellite_push_front(reference, role, id);
        Ok(())
    }

    fn replace(&mut self, new_id: NodeId, new_kind: NodeKind, old: NodeId) -> Result<()> {
        let old_entry = self.entry(old)?;
        let parent = old_entry
            .parent
            .ok_or(Error::BadPlacement {
                placement: Placement::Replace,
            })?;
        let prev = old_entry.prev_sibling;

        self.nodes.insert(new_id, NodeEntry::new(new_id, new_kind));
        self.remove_inner(old)?;

        match prev {
            Some(p) if self.nodes.contains_key(&p) => self.insert_after_sibling(p, new_id),
            _ => self.group_push_front(parent, new_id),
        }
        Ok(())
    }

    /// Unlinks `id` and recursively releases its subtree and satellites, handing
    /// the freed nodes to the background-drop worker.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.remove_inner(id)
    }

    fn remove_inner(&mut self, id: NodeId) -> Result<()> {
        self.entry(id)?;
        self.unlink_from_owner(id);
        let mut retired = Vec::new();
        self.collect_subtree(id, &mut retired);
        self.retire(retired);
        Ok(())
    }

    /// Frees every child of a group without freeing the group itself.
    pub fn free_all_children(&mut self, id: NodeId) -> Result<()> {
        let children: Vec<NodeId> = {
            let entry = self.entry(id)?;
            let group = entry.as_group().ok_or(Error::BadPlacement {
                placement: Placement::Head,
            })?;
            let mut out = Vec::with_capacity(group.child_count);
            let mut cur = group.children_head;
            while let Some(c) = cur {
                out.push(c);
                cur = self.nodes[&c].next_sibling;
            }
            out
        };
        for child in children {
            self.remove_inner(child)?;
        }
        Ok(())
    }

    /// Recursively gathers `id` and everything it owns (children, satellites, their
    /// children and satellites) into `out`, removing each from the node table as it
    /// goes. Does not touch owner links outside the subtree; the caller is
    /// responsible for having already unlinked `id` from wherever it lived.
    fn collect_subtree(&mut self, id: NodeId, out: &mut Vec<NodeEntry>) {
        let child_ids: Vec<NodeId> = match self.nodes.get(&id).map(|e| &e.kind) {
            Some(NodeKind::Group(g)) => {
                let mut v = Vec::with_capacity(g.child_count);
                let mut cur = g.children_head;
                while let Some(c) = cur {
                    v.push(c);
                    cur = self.nodes[&c].next_sibling;
                }
                v
            }
            _ => Vec::new(),
        };
        let satellite_ids: Vec<NodeId> = match self.nodes.get(&id) {
            Some(e) => {
                let mut v = Vec::new();
                let mut cur = e.satellite_predecessors_head;
                while let Some(s) = cur {
                    v.push(s);
                    cur = self.nodes[&s].next_satellite;
                }
                let mut cur = e.satellite_successors_head;
                while let Some(s) = cur {
                    v.push(s);
                    cur = self.nodes[&s].next_satellite;
                }
                v
            }
            None => Vec::new(),
        };

        for child in child_ids {
            self.collect_subtree(child, out);
        }
        for sat in satellite_ids {
            self.collect_subtree(sat, out);
        }

        if let Some(mut entry) = self.nodes.remove(&id) {
            if matches!(entry.kind, NodeKind::Synth(_)) {
                self.synth_count = self.synth_count.saturating_sub(1);
            }
            entry.parent = None;
            entry.prev_sibling = None;
            entry.next_sibling = None;
            entry.prev_satellite = None;
            entry.next_satellite = None;
            out.push(entry);
        }
    }

    fn retire(&mut self, nodes: Vec<NodeEntry>) {
        if nodes.is_empty() {
            return;
        }
        crate::background_drop::ensure_background_drop_thread_started();
        let boxed: Box<RetiredNodes> = Box::new(RetiredNodes(nodes));
        crate::background_drop::retire_nodes(boxed);
    }

    pub fn pause(&mut self, id: NodeId) -> Result<()> {
        self.set_running(id, false)
    }

    pub fn resume(&mut self, id: NodeId) -> Result<()> {
        self.set_running(id, true)
    }

    fn set_running(&mut self, id: NodeId, running: bool) -> Result<()> {
        self.entry(id)?;
        let children: Vec<NodeId> = match self.nodes.get(&id).map(|e| &e.kind) {
            Some(NodeKind::Group(g)) => {
                let mut v = Vec::with_capacity(g.child_count);
                let mut cur = g.children_head;
                while let Some(c) = cur {
                    v.push(c);
                    cur = self.nodes[&c].next_sibling;
                }
                v
            }
            _ => Vec::new(),
        };
        self.nodes.get_mut(&id).unwrap().running = running;
        for child in children {
            self.set_running(child, running)?;
        }
        Ok(())
    }

    /// Sets a parameter on a synth, or broadcasts the same set to every descendant
    /// synth of a group. Returns the first validation failure encountered, if any,
    /// after having already applied the set everywhere it was valid.
    pub fn set(&mut self, id: NodeId, slot: Slot, value: Value) -> Result<()> {
        self.entry(id)?;
        let is_group = self.nodes[&id].is_group();
        if !is_group {
            return self.set_on_synth(id, slot, value);
        }

        let children: Vec<NodeId> = {
            let g = self.nodes[&id].as_group().unwrap();
            let mut v = Vec::with_capacity(g.child_count);
            let mut cur = g.children_head;
            while let Some(c) = cur {
                v.push(c);
                cur = self.nodes[&c].next_sibling;
            }
            v
        };
        let mut first_err = None;
        for child in children {
            if let Err(e) = self.set(child, slot.clone(), value.clone()) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_on_synth(&mut self, id: NodeId, slot: Slot, value: Value) -> Result<()> {
        if let Slot::Index(i) = &slot {
            if *i >= crate::config::MAX_INDEXED_SLOTS {
                return Err(Error::InvalidSlot { id: id.0, slot });
            }
        }
        let entry = self.nodes.get_mut(&id).unwrap();
        match &mut entry.kind {
            NodeKind::Synth(s) => {
                s.params.insert(slot, value);
                Ok(())
            }
            NodeKind::Group(_) => unreachable!("set_on_synth called on a group"),
        }
    }

    // --- sibling list primitives -------------------------------------------------

    fn group_push_front(&mut self, parent: NodeId, child: NodeId) {
        let old_head = {
            let g = self.nodes.get_mut(&parent).unwrap().as_group_mut().unwrap();
            let old_head = g.children_head;
            g.children_head = Some(child);
            if old_head.is_none() {
                g.children_tail = Some(child);
            }
            g.child_count += 1;
            old_head
        };
        if let Some(h) = old_head {
            self.nodes.get_mut(&h).unwrap().prev_sibling = Some(child);
        }
        let c = self.nodes.get_mut(&child).unwrap();
        c.parent = Some(parent);
        c.prev_sibling = None;
        c.next_sibling = old_head;
    }

    fn group_push_back(&mut self, parent: NodeId, child: NodeId) {
        let old_tail = {
            let g = self.nodes.get_mut(&parent).unwrap().as_group_mut().unwrap();
            let old_tail = g.children_tail;
            g.children_tail = Some(child);
            if old_tail.is_none() {
                g.children_head = Some(child);
            }
            g.child_count += 1;
            old_tail
        };
        if let Some(t) = old_tail {
            self.nodes.get_mut(&t).unwrap().next_sibling = Some(child);
        }
        let c = self.nodes.get_mut(&child).unwrap();
        c.parent = Some(parent);
        c.prev_sibling = old_tail;
        c.next_sibling = None;
    }

    fn insert_before_sibling(&mut self, reference: NodeId, child: NodeId) {
        let parent = self.nodes[&reference].parent.unwrap();
        let prev = self.nodes[&reference].prev_sibling;
        match prev {
            Some(p) => {
                self.nodes.get_mut(&p).unwrap().next_sibling = Some(child);
            }
            None => {
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .as_group_mut()
                    .unwrap()
                    .children_head = Some(child);
            }
        }
        self.nodes.get_mut(&reference).unwrap().prev_sibling = Some(child);
        self.nodes.get_mut(&parent).unwrap().as_group_mut().unwrap().child_count += 1;
        let c = self.nodes.get_mut(&child).unwrap();
        c.parent = Some(parent);
        c.prev_sibling = prev;
        c.next_sibling = Some(reference);
    }

    fn insert_after_sibling(&mut self, reference: NodeId, child: NodeId) {
        let parent = self.nodes[&reference].parent.unwrap();
        let next = self.nodes[&reference].next_sibling;
        match next {
            Some(n) => {
                self.nodes.get_mut(&n).unwrap().prev_sibling = Some(child);
            }
            None => {
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .as_group_mut()
                    .unwrap()
                    .children_tail = Some(child);
            }
        }
        self.nodes.get_mut(&reference).unwrap().next_sibling = Some(child);
        self.nodes.get_mut(&parent).unwrap().as_group_mut().unwrap().child_count += 1;
        let c = self.nodes.get_mut(&child).unwrap();
        c.parent = Some(parent);
        c.prev_sibling = Some(reference);
        c.next_sibling = next;
    }

    /// Removes `id` from whichever list currently owns it (a parent's child list,
    /// or a reference node's satellite list). No-op if `id` is the tree root or is
    /// not currently linked anywhere (e.g. has already been detached).
    fn unlink_from_owner(&mut self, id: NodeId) {
        let (parent, satellite_of) = {
            let e = &self.nodes[&id];
            (e.parent, e.satellite_of)
        };
        if parent.is_some() {
            self.unlink_sibling(id);
        } else if satellite_of.is_some() {
            self.unlink_satellite(id);
        }
    }

    fn unlink_sibling(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let e = &self.nodes[&id];
            (e.parent.unwrap(), e.prev_sibling, e.next_sibling)
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next_sibling = next,
            None => {
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .as_group_mut()
                    .unwrap()
                    .children_head = next;
            }
        }
        match next {
            Some(n) => self.nodes.get_mut(&n).unwrap().prev_sibling = prev,
            None => {
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .as_group_mut()
                    .unwrap()
                    .children_tail = prev;
            }
        }
        let g = self.nodes.get_mut(&parent).unwrap().as_group_mut().unwrap();
        g.child_count = g.child_count.saturating_sub(1);
        let e = self.nodes.get_mut(&id).unwrap();
        e.parent = None;
        e.prev_sibling = None;
        e.next_sibling = None;
    }

    // --- satellite list primitives ------------------------------------------------

    fn satellite_push_front(&mut self, reference: NodeId, role: SatelliteRole, node: NodeId) {
        let old_head = {
            let e = self.nodes.get_mut(&reference).unwrap();
            let head_field = match role {
                SatelliteRole::Predecessor => &mut e.satellite_predecessors_head,
                SatelliteRole::Successor => &mut e.satellite_successors_head,
            };
            let old = *head_field;
            *head_field = Some(node);
            old
        };
        if let Some(h) = old_head {
            self.nodes.get_mut(&h).unwrap().prev_satellite = Some(node);
        }
        let n = self.nodes.get_mut(&node).unwrap();
        n.satellite_of = Some((reference, role));
        n.prev_satellite = None;
        n.next_satellite = old_head;
    }

    fn unlink_satellite(&mut self, id: NodeId) {
        let (reference, role, prev, next) = {
            let e = &self.nodes[&id];
            let (reference, role) = e.satellite_of.unwrap();
            (reference, role, e.prev_satellite, e.next_satellite)
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next_satellite = next,
            None => {
                let e = self.nodes.get_mut(&reference).unwrap();
                let head_field = match role {
                    SatelliteRole::Predecessor => &mut e.satellite_predecessors_head,
                    SatelliteRole::Successor => &mut e.satellite_successors_head,
                };
                *head_field = next;
            }
        }
        if let Some(n) = next {
            self.nodes.get_mut(&n).unwrap().prev_satellite = prev;
        }
        let e = self.nodes.get_mut(&id).unwrap();
        e.satellite_of = None;
        e.prev_satellite = None;
        e.next_satellite = None;
    }
}
