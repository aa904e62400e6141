//! Call Graph
//!
//! This module implements the dependency graph that tracks which tasks wait
//! on which, and how each of them finished.
//!
//! # Overview
//!
//! - Nodes represent registered objects: runnable tasks, or plain values
//!   somebody waits on.
//! - Edges are wait relations: if A waits on B, A's node lists B's id.
//!
//! Every object is identified by reference, never by value. The first time
//! an object is seen it gets the next sequential id and a leaf node.
//!
//! # Design Decisions
//!
//! 1. The graph is generic over the object type so it can be exercised
//!    without a scheduler.
//!
//! 2. Nodes live in a dense table indexed by id. Nothing is ever removed;
//!    the graph grows for the lifetime of its scheduler.
//!
//! 3. Only forward edges are stored. Readiness is recomputed from scratch
//!    every tick, which keeps rewaiting (replacing a wait set) trivial.

mod call_graph;
mod node;
mod registry;

pub use call_graph::{CallGraph, GraphCounts, ResumeValue, WaitSet};
pub use node::{Node, NodeId, NodeKind, Outcome, WaitIds};
pub use registry::{Identity, IdentityRegistry};
