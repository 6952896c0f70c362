//! The dependency-graph scheduler core of a real-time audio synthesis server: a
//! hierarchical tree of synth and group nodes is compiled into a work queue of
//! items with atomic activation counters, drained once per control-rate block by a
//! fixed pool of real-time worker threads.
#![allow(dead_code)]

#[macro_use]
mod variant;
#[macro_use]
mod logging;

mod background_drop;
mod command;
mod config;
mod error;
mod generator;
mod is_audio_thread;
mod node_tree;
mod option_recycler;
mod queue;
mod rt_pool;
mod scheduler;
mod worker_pool;

pub use command::{CommandIntake, GroupFreeAll, Mutation, NodeFree, NodeNewGroup, NodeNewSynth, NodeRun, NodeSet};
pub use config::{block_period, BLOCK_SIZE, SAMPLE_RATE};
pub use error::{Error, Result};
pub use node_tree::{NewNodeKind, NodeId, Placement, Position, Slot, Value};
pub use queue::WorkQueue;
pub use rt_pool::{RtPool, RtPoolCapacities};
pub use scheduler::Server;
pub use worker_pool::glitch_count;
