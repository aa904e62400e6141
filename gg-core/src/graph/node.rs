//! Graph Nodes
//!
//! This module defines the node records stored in the call graph. A node
//! tracks what its task is waiting on and how the task finished.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{TaskError, TaskResult};

/// Stable identifier for a node in the call graph.
///
/// Ids are handed out sequentially by the identity registry and are never
/// reused; the graph only grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u64)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The shape of a node's wait relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// Waits on nothing. Runnable right away, or a plain dependency.
    Leaf,

    /// Waits on exactly one other node.
    Single,

    /// Waits on an ordered list of nodes.
    Multi,
}

/// Wait ids in declaration order. Duplicates are kept so that every
/// declared slot gets its value back.
pub type WaitIds = SmallVec<[NodeId; 4]>;

/// Terminal state of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pending,
    Succeeded(Value),
    Failed(TaskError),
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    /// Succeeded or failed. Either one unblocks waiters.
    pub fn is_finished(&self) -> bool {
        !self.is_pending()
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskResult> for Outcome {
    fn from(result: TaskResult) -> Self {
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// A node in the call graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,

    /// Nodes this one waits on, in declaration order.
    wait_ids: WaitIds,

    outcome: Outcome,
}

impl Node {
    /// Create a node that waits on nothing.
    pub fn leaf(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Leaf,
            wait_ids: WaitIds::new(),
            outcome: Outcome::Pending,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn wait_ids(&self) -> &[NodeId] {
        &self.wait_ids
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Replace the wait relation. A recorded outcome is left untouched.
    pub fn set_waits(&mut self, kind: NodeKind, wait_ids: WaitIds) {
        self.kind = kind;
        self.wait_ids = wait_ids;
    }

    /// Record the terminal outcome.
    ///
    /// Only the first call has an effect; later calls return `false` and
    /// leave the stored outcome as it was.
    pub fn set_outcome(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_finished() || outcome.is_pending() {
            return false;
        }
        self.outcome = outcome;
        true
    }
}
