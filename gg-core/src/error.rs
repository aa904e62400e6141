//! Error Types
//!
//! Two classes of failure flow through the scheduler and are kept apart:
//!
//! - [`TaskError`]: a single node failed. It is delivered to whichever
//!   computations wait on that node and can be handled there.
//! - [`SchedulerError`]: the scheduler itself could not make progress
//!   (a resolver failed, or a task cannot be run). It aborts active runs.
//!
//! [`RunError`] is what a top-level run reports, wrapping one or the other.

use crate::graph::NodeId;

/// Boxed error returned by resolver callbacks and loader fetch functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a task: its final value or its failure.
pub type TaskResult = Result<serde_json::Value, TaskError>;

/// Failure of a single task.
///
/// Cheap to clone, since one failure may be delivered to many waiters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn outside_computation() -> Self {
        Self::new("wait called outside of a running computation")
    }

    pub(crate) fn completion_dropped() -> Self {
        Self::new("deferred task dropped its completion without reporting")
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("value conversion failed: {err}"))
    }
}

/// Infrastructure failure not attributable to a single computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A resolver registered with `on_dispatch` returned an error.
    #[error("resolver failed during dispatch: {message}")]
    Resolver { message: String },

    /// A ready node holds a task that cannot be stepped.
    #[error("node {node} holds {kind} task, which cannot be run")]
    Unsupported { node: NodeId, kind: &'static str },

    /// The blocking entry point could not start its runtime.
    #[error("failed to start scheduler runtime: {message}")]
    Runtime { message: String },
}

/// Failure reported by a top-level run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// The root task finished with an error.
    #[error("root task failed: {0}")]
    Failed(TaskError),

    /// The run was aborted by a scheduler-fatal error.
    #[error("run aborted: {0}")]
    Aborted(SchedulerError),
}

impl RunError {
    /// The root's own failure, if this is not a scheduler abort.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            RunError::Failed(err) => Some(err),
            RunError::Aborted(_) => None,
        }
    }

    /// Whether the run was aborted by the scheduler rather than by its root.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunError::Aborted(_))
    }
}
