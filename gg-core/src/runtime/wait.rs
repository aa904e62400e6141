//! Wait Points
//!
//! The futures a computation awaits to declare what it depends on. Each one
//! takes two polls:
//!
//! 1. The first poll records the wait set on the node currently being
//!    stepped and returns `Pending`. The step ends there.
//! 2. The scheduler polls the computation again only once every dependency
//!    has finished. The second poll returns the collected value, or the
//!    first dependency failure as an `Err` the computation can handle.
//!
//! Awaiting two wait points concurrently inside one computation is not
//! supported; the later declaration replaces the earlier one. Use
//! [`Scheduler::wait_all`] instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tracing::trace;

use super::context::RunContext;
use super::scheduler::Scheduler;
use super::task::Task;
use crate::error::TaskError;
use crate::graph::{NodeId, ResumeValue, WaitSet};

enum WaitState {
    Declaring(WaitSet<Task>),
    Suspended(NodeId),
    Done,
}

/// Shared two-poll machinery behind [`Wait`] and [`WaitAll`].
struct WaitPoint {
    scheduler: Scheduler,
    state: WaitState,
}

impl WaitPoint {
    fn new(scheduler: &Scheduler, deps: WaitSet<Task>) -> Self {
        Self {
            scheduler: scheduler.clone(),
            state: WaitState::Declaring(deps),
        }
    }

    fn poll_resume(&mut self) -> Poll<Result<ResumeValue, TaskError>> {
        match std::mem::replace(&mut self.state, WaitState::Done) {
            WaitState::Declaring(deps) => {
                let Some(node) = RunContext::current() else {
                    return Poll::Ready(Err(TaskError::outside_computation()));
                };
                self.scheduler.declare_waits(node, &deps);
                trace!(%node, "suspended");
                self.state = WaitState::Suspended(node);
                Poll::Pending
            }
            WaitState::Suspended(node) => Poll::Ready(self.scheduler.resume_input(node)),
            // Resuming past completion is a no-op.
            WaitState::Done => Poll::Ready(Ok(ResumeValue::Empty)),
        }
    }
}

/// Resolves to the value of one dependency, or to nothing for
/// [`Scheduler::wait_for_dispatch`].
#[must_use = "wait points do nothing unless awaited"]
pub struct Wait {
    point: WaitPoint,
}

impl Future for Wait {
    type Output = Result<Value, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .point
            .poll_resume()
            .map(|resumed| resumed.map(ResumeValue::into_value))
    }
}

/// Resolves to one value per declared dependency, in declaration order.
#[must_use = "wait points do nothing unless awaited"]
pub struct WaitAll {
    point: WaitPoint,
}

impl Future for WaitAll {
    type Output = Result<Vec<Value>, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .point
            .poll_resume()
            .map(|resumed| resumed.map(ResumeValue::into_values))
    }
}

impl Scheduler {
    /// Suspend the current computation until `dep` finishes.
    pub fn wait(&self, dep: &Task) -> Wait {
        Wait {
            point: WaitPoint::new(self, WaitSet::One(dep.clone())),
        }
    }

    /// Suspend the current computation until every task in `deps` finishes.
    pub fn wait_all<I>(&self, deps: I) -> WaitAll
    where
        I: IntoIterator<Item = Task>,
    {
        WaitAll {
            point: WaitPoint::new(self, WaitSet::All(deps.into_iter().collect())),
        }
    }

    /// Suspend the current computation until the next tick.
    ///
    /// The next tick runs every resolver before resuming anything, so this is
    /// how a computation waits for keys it queued with a batch loader.
    pub fn wait_for_dispatch(&self) -> Wait {
        Wait {
            point: WaitPoint::new(self, WaitSet::None),
        }
    }
}
