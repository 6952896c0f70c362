//! Typed errors returned to command sources.
//!
//! None of these are fatal to the server: a failed command leaves the node tree
//! unchanged, and a failed rebuild leaves the previous work queue in place for the
//! next block. Debug builds additionally `debug_assert!` on DAG invariant violations
//! in the generator (see `crate::generator::validate_queue`); those are bugs, not
//! values of this enum.

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("a node with id {id} already exists")]
    DuplicateId { id: i32 },

    #[error("no node with id {id}")]
    UnknownNode { id: i32 },

    #[error("placement {placement:?} is not valid for the referenced node")]
    BadPlacement { placement: crate::node_tree::Placement },

    #[error("real-time pool exhausted while allocating {what}")]
    PoolExhausted { what: &'static str },

    #[error("node {id} has no slot {slot:?}")]
    InvalidSlot {
        id: i32,
        slot: crate::node_tree::Slot,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
