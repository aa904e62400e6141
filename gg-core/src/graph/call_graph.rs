//! Call Graph
//!
//! The call graph owns every node the scheduler has seen and answers the two
//! questions the tick loop asks:
//!
//! 1. Which nodes are ready? A node is ready when it has no outcome yet and
//!    every node it waits on has one (success and failure both count).
//! 2. What does a resumed node receive? The values of the nodes it waited
//!    on, in the order they were declared.
//!
//! Nodes are never removed. The graph lives as long as its scheduler.

use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind, Outcome, WaitIds};
use super::registry::{Identity, IdentityRegistry};
use crate::error::{TaskError, TaskResult};

/// What a node waits on.
#[derive(Debug, Clone)]
pub enum WaitSet<T> {
    /// Nothing: resume on the next tick.
    None,
    /// Exactly one object.
    One(T),
    /// An ordered list of objects.
    All(Vec<T>),
}

/// The value handed to a node when it resumes.
///
/// Slots of failed dependencies hold `None`. The failure itself is raised
/// separately, see [`CallGraph::first_failure`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeValue {
    Empty,
    Single(Option<Value>),
    Multi(Vec<Option<Value>>),
}

impl ResumeValue {
    /// Collapse into one JSON value. Missing values become `null`.
    pub fn into_value(self) -> Value {
        match self {
            ResumeValue::Empty => Value::Null,
            ResumeValue::Single(value) => value.unwrap_or(Value::Null),
            ResumeValue::Multi(values) => Value::Array(Self::fill(values)),
        }
    }

    /// One value per declared dependency.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            ResumeValue::Empty => Vec::new(),
            ResumeValue::Single(value) => vec![value.unwrap_or(Value::Null)],
            ResumeValue::Multi(values) => Self::fill(values),
        }
    }

    fn fill(values: Vec<Option<Value>>) -> Vec<Value> {
        values
            .into_iter()
            .map(|value| value.unwrap_or(Value::Null))
            .collect()
    }
}

/// Node counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Dependency graph over objects of type `T`, keyed by identity.
#[derive(Debug)]
pub struct CallGraph<T> {
    registry: IdentityRegistry<T>,

    /// Indexed by `NodeId`. Every registered object has a node.
    nodes: Vec<Node>,
}

impl<T: Identity + Clone> CallGraph<T> {
    pub fn new() -> Self {
        Self {
            registry: IdentityRegistry::new(),
            nodes: Vec::new(),
        }
    }

    /// Id of `obj`, registering it as a leaf node on first sight.
    pub fn id(&mut self, obj: &T) -> NodeId {
        let (id, created) = self.registry.id_of(obj);
        if created {
            self.nodes.push(Node::leaf(id));
        }
        id
    }

    /// Id of `obj` without registering it.
    pub fn get_id(&self, obj: &T) -> Option<NodeId> {
        self.registry.get_id(obj)
    }

    /// The object registered under `id`.
    pub fn obj(&self, id: NodeId) -> Option<&T> {
        self.registry.get(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn outcome(&self, id: NodeId) -> Option<&Outcome> {
        self.node(id).map(Node::outcome)
    }

    /// Declare what `obj` waits on, registering it and its dependencies.
    pub fn set_dependencies(&mut self, obj: &T, deps: &WaitSet<T>) -> NodeId {
        let id = self.id(obj);
        self.set_dependencies_of(id, deps);
        id
    }

    /// Declare what the node `id` waits on.
    ///
    /// Replaces any earlier wait set. Returns `false` if `id` is unknown.
    pub fn set_dependencies_of(&mut self, id: NodeId, deps: &WaitSet<T>) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        let (kind, wait_ids): (NodeKind, WaitIds) = match deps {
            WaitSet::None => (NodeKind::Leaf, SmallVec::new()),
            WaitSet::One(dep) => (NodeKind::Single, SmallVec::from_elem(self.id(dep), 1)),
            WaitSet::All(deps) => (NodeKind::Multi, deps.iter().map(|dep| self.id(dep)).collect()),
        };
        self.nodes[id.index()].set_waits(kind, wait_ids);
        true
    }

    fn is_finished(&self, id: NodeId) -> bool {
        self.outcome(id).is_some_and(Outcome::is_finished)
    }

    /// Pending, and everything it waits on has finished.
    pub fn is_ready(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) => {
                node.outcome().is_pending()
                    && node.wait_ids().iter().all(|&dep| self.is_finished(dep))
            }
            None => false,
        }
    }

    /// All ready nodes, in id order.
    pub fn ready_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(Node::id)
            .filter(|&id| self.is_ready(id))
            .collect()
    }

    /// Values of the node's dependencies, shaped by its kind.
    pub fn resume_value(&self, id: NodeId) -> ResumeValue {
        let Some(node) = self.node(id) else {
            return ResumeValue::Empty;
        };
        let value_of = |dep: &NodeId| {
            self.outcome(*dep)
                .and_then(Outcome::value)
                .cloned()
        };
        match node.kind() {
            NodeKind::Leaf => ResumeValue::Empty,
            NodeKind::Single => ResumeValue::Single(node.wait_ids().first().and_then(value_of)),
            NodeKind::Multi => ResumeValue::Multi(node.wait_ids().iter().map(value_of).collect()),
        }
    }

    /// The first failure among the node's dependencies, in declared order.
    pub fn first_failure(&self, id: NodeId) -> Option<TaskError> {
        self.node(id)?
            .wait_ids()
            .iter()
            .find_map(|&dep| self.outcome(dep).and_then(Outcome::error))
            .cloned()
    }

    /// Record the node's terminal result.
    ///
    /// The first call wins. A second call is ignored and returns `false`.
    pub fn set_outcome(&mut self, id: NodeId, result: TaskResult) -> bool {
        match self.nodes.get_mut(id.index()) {
            Some(node) => node.set_outcome(result.into()),
            None => false,
        }
    }

    pub fn counts(&self) -> GraphCounts {
        self.nodes.iter().fold(
            GraphCounts {
                nodes: self.nodes.len(),
                ..GraphCounts::default()
            },
            |mut counts, node| {
                match node.outcome() {
                    Outcome::Pending => counts.pending += 1,
                    Outcome::Succeeded(_) => counts.succeeded += 1,
                    Outcome::Failed(_) => counts.failed += 1,
                }
                counts
            },
        )
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T: Identity + Clone> Default for CallGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    type Obj = Arc<&'static str>;

    fn obj(name: &'static str) -> Obj {
        Arc::new(name)
    }

    /// Readiness must agree with its definition for every node.
    fn assert_readiness_consistent(graph: &CallGraph<Obj>) {
        let ready = graph.ready_ids();
        for index in 0..graph.len() {
            let id = NodeId::from_index(index);
            let node = graph.node(id).unwrap();
            let expected = node.outcome().is_pending()
                && node
                    .wait_ids()
                    .iter()
                    .all(|dep| graph.outcome(*dep).unwrap().is_finished());
            assert_eq!(graph.is_ready(id), expected, "node {id}");
            assert_eq!(ready.contains(&id), expected, "node {id}");
        }
    }

    #[test]
    fn registering_dependencies_creates_leaves() {
        let mut graph = CallGraph::new();
        let (a, b, c) = (obj("a"), obj("b"), obj("c"));

        let id = graph.set_dependencies(&a, &WaitSet::All(vec![b.clone(), c.clone()]));

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node(id).unwrap().kind(), NodeKind::Multi);
        let b_id = graph.get_id(&b).unwrap();
        assert_eq!(graph.node(b_id).unwrap().kind(), NodeKind::Leaf);
        assert_eq!(graph.ready_ids().len(), 2);
        assert!(!graph.is_ready(id));
        assert_readiness_consistent(&graph);
    }

    #[test]
    fn failure_unblocks_waiters() {
        let mut graph = CallGraph::new();
        let (a, b) = (obj("a"), obj("b"));
        let a_id = graph.set_dependencies(&a, &WaitSet::One(b.clone()));
        let b_id = graph.id(&b);

        assert!(graph.set_outcome(b_id, Err(TaskError::new("oops."))));

        assert!(graph.is_ready(a_id));
        assert_eq!(graph.resume_value(a_id), ResumeValue::Single(None));
        assert_eq!(graph.first_failure(a_id), Some(TaskError::new("oops.")));
        assert_readiness_consistent(&graph);
    }

    #[test]
    fn multi_resume_preserves_declared_order() {
        let mut graph = CallGraph::new();
        let (root, a, b, c) = (obj("root"), obj("a"), obj("b"), obj("c"));
        let root_id =
            graph.set_dependencies(&root, &WaitSet::All(vec![a.clone(), b.clone(), c.clone()]));

        // Finish in reverse order.
        for (dep, value) in [(&c, "C"), (&b, "B"), (&a, "A")] {
            assert!(!graph.is_ready(root_id));
            let id = graph.id(dep);
            graph.set_outcome(id, Ok(json!(value)));
            assert_readiness_consistent(&graph);
        }

        assert!(graph.is_ready(root_id));
        assert_eq!(
            graph.resume_value(root_id).into_value(),
            json!(["A", "B", "C"])
        );
    }

    #[test]
    fn duplicate_dependencies_fill_every_slot() {
        let mut graph = CallGraph::new();
        let (root, dep) = (obj("root"), obj("dep"));
        let root_id = graph.set_dependencies(&root, &WaitSet::All(vec![dep.clone(), dep.clone()]));
        assert_eq!(graph.len(), 2);

        let dep_id = graph.id(&dep);
        graph.set_outcome(dep_id, Ok(json!(7)));

        assert_eq!(
            graph.resume_value(root_id).into_values(),
            vec![json!(7), json!(7)]
        );
    }

    #[test]
    fn second_outcome_is_ignored() {
        let mut graph = CallGraph::new();
        let a = obj("a");
        let id = graph.id(&a);

        assert!(graph.set_outcome(id, Ok(json!("first"))));
        assert!(!graph.set_outcome(id, Ok(json!("second"))));
        assert!(!graph.set_outcome(id, Err(TaskError::new("late"))));

        assert_eq!(graph.outcome(id).unwrap().value(), Some(&json!("first")));
        assert!(!graph.is_ready(id));
    }

    #[test]
    fn rewaiting_replaces_the_wait_set() {
        let mut graph = CallGraph::new();
        let (a, b, c) = (obj("a"), obj("b"), obj("c"));
        let a_id = graph.set_dependencies(&a, &WaitSet::One(b.clone()));
        let b_id = graph.id(&b);
        graph.set_outcome(b_id, Ok(json!(1)));
        assert!(graph.is_ready(a_id));

        graph.set_dependencies(&a, &WaitSet::One(c.clone()));
        assert!(!graph.is_ready(a_id));

        graph.set_dependencies(&a, &WaitSet::None);
        assert!(graph.is_ready(a_id));
        assert_eq!(graph.resume_value(a_id), ResumeValue::Empty);
        assert_readiness_consistent(&graph);
    }

    #[test]
    fn unknown_ids_are_inert() {
        let mut graph: CallGraph<Obj> = CallGraph::new();
        let missing = NodeId::from_index(5);

        assert!(!graph.is_ready(missing));
        assert!(!graph.set_outcome(missing, Ok(Value::Null)));
        assert!(!graph.set_dependencies_of(missing, &WaitSet::None));
        assert_eq!(graph.resume_value(missing), ResumeValue::Empty);
    }

    #[test]
    fn counts_by_outcome() {
        let mut graph = CallGraph::new();
        let objs: Vec<Obj> = vec![obj("a"), obj("b"), obj("c")];
        let ids: Vec<NodeId> = objs.iter().map(|o| graph.id(o)).collect();
        graph.set_outcome(ids[0], Ok(json!(1)));
        graph.set_outcome(ids[1], Err(TaskError::new("x")));

        assert_eq!(
            graph.counts(),
            GraphCounts {
                nodes: 3,
                pending: 1,
                succeeded: 1,
                failed: 1,
            }
        );
    }
}
