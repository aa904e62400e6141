//! Tasks
//!
//! A [`Task`] is the object the scheduler registers, steps, and hands out
//! ids for. It is a cheap handle: clones share identity, so waiting on a
//! clone is waiting on the same task.
//!
//! A task holds exactly one kind of runnable:
//!
//! - **Computation**: a future that suspends only at the scheduler's wait
//!   points. Each step polls it once.
//! - **Deferred**: a callback that is started once and later reports through
//!   a [`Completion`].
//! - **Eventual**: a future that the step phase awaits to completion.
//! - **Opaque**: a plain value. It can be waited on but never run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{TaskError, TaskResult};
use crate::graph::Identity;

pub(crate) type StartFn = Box<dyn FnOnce(Completion) + Send>;

/// The runnable held by a task. Slots are emptied once the runnable has
/// been consumed.
pub(crate) enum Runnable {
    Computation(Mutex<Option<BoxFuture<'static, TaskResult>>>),
    Deferred(Mutex<Option<StartFn>>),
    Eventual(Mutex<Option<BoxFuture<'static, TaskResult>>>),
    Opaque(Value),
}

impl Runnable {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Runnable::Computation(_) => "computation",
            Runnable::Deferred(_) => "deferred",
            Runnable::Eventual(_) => "eventual",
            Runnable::Opaque(_) => "opaque",
        }
    }
}

/// Handle to a runnable registered by identity.
#[derive(Clone)]
pub struct Task {
    runnable: Arc<Runnable>,
}

impl Task {
    fn from_runnable(runnable: Runnable) -> Self {
        Self {
            runnable: Arc::new(runnable),
        }
    }

    /// A resumable computation.
    ///
    /// The future must only suspend on the scheduler's wait points
    /// (`wait`, `wait_all`, `wait_for_dispatch`).
    pub fn computation<F>(future: F) -> Self
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        Self::from_runnable(Runnable::Computation(Mutex::new(Some(future.boxed()))))
    }

    /// A callback-style unit. `start` is called once, when the task is first
    /// stepped, and must eventually report through the completion.
    pub fn deferred<F>(start: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self::from_runnable(Runnable::Deferred(Mutex::new(Some(Box::new(start)))))
    }

    /// An eventual value. The future is driven to completion when the task
    /// is stepped and may await anything.
    pub fn eventual<F>(future: F) -> Self
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        Self::from_runnable(Runnable::Eventual(Mutex::new(Some(future.boxed()))))
    }

    /// A plain value with no way to run. Stepping it is a scheduler error.
    pub fn opaque(value: Value) -> Self {
        Self::from_runnable(Runnable::Opaque(value))
    }

    /// The value an opaque task was built from.
    pub fn value(&self) -> Option<&Value> {
        match self.runnable.as_ref() {
            Runnable::Opaque(value) => Some(value),
            _ => None,
        }
    }

    /// Name of the runnable kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        self.runnable.kind()
    }

    pub(crate) fn runnable(&self) -> &Runnable {
        &self.runnable
    }

    /// Whether both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.runnable, &other.runnable)
    }
}

impl Identity for Task {
    fn identity(&self) -> usize {
        self.runnable.identity()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("identity", &format_args!("{:#x}", self.identity()))
            .finish()
    }
}

/// Single-use reporter handed to a deferred task.
///
/// Consumed by reporting, so a result can be delivered at most once.
/// Dropping it without reporting fails the task.
pub struct Completion {
    tx: oneshot::Sender<TaskResult>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<TaskResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn complete(self, result: TaskResult) {
        // The receiver is gone only if the scheduler was dropped mid-step.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self, value: Value) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: impl Into<TaskError>) {
        self.complete(Err(err.into()));
    }
}
