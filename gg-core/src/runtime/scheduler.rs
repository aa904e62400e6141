//! Scheduler
//!
//! The scheduler owns the call graph and drives it forward one tick at a
//! time until a run's root task finishes.
//!
//! # Tick
//!
//! 1. Dispatch: every resolver registered with [`Scheduler::on_dispatch`]
//!    runs, all at once, and the tick waits for every one of them. If any
//!    of them failed, the first failure aborts the active runs.
//! 2. Readiness: collect the nodes that are pending and whose dependencies
//!    have all finished.
//! 3. Step: advance every ready node by one step, concurrently, and wait
//!    for all of them.
//! 4. Yield to the async runtime, then loop.
//!
//! The loop is iterative, so stack depth does not grow with the number of
//! ticks or the size of the graph.
//!
//! # Concurrent runs
//!
//! Any number of [`Scheduler::run`] calls may be active on one scheduler.
//! Ticks are serialized by a lock and each active run takes turns driving
//! them. Every tick advances all ready nodes, whichever run they belong
//! to, so runs that share a task also share its result.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::config::SchedulerConfig;
use super::context::RunContext;
use super::task::{Completion, Runnable, Task};
use crate::error::{BoxError, RunError, SchedulerError, TaskError, TaskResult};
use crate::graph::{CallGraph, GraphCounts, NodeId, Outcome, ResumeValue, WaitSet};

type Resolver = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub graph: GraphCounts,
    pub resolvers: usize,
    pub active_runs: usize,
}

struct Inner {
    config: SchedulerConfig,
    graph: Mutex<CallGraph<Task>>,
    resolvers: RwLock<Vec<Resolver>>,

    /// Held for the whole of a tick, so ticks never overlap.
    tick_lock: tokio::sync::Mutex<()>,
    ticks: AtomicU64,
    idle_ticks: AtomicU32,

    /// Nodes whose step was a fatal error. They stay pending but are never
    /// stepped again, so the error is raised once.
    faulted: Mutex<HashSet<NodeId>>,

    /// Active runs, each with a slot for a fatal error that aborted it.
    runs: Mutex<HashMap<u64, Option<SchedulerError>>>,
    next_run: AtomicU64,
}

/// Cooperative scheduler that batches the fetches of suspended computations.
///
/// Cheap to clone; clones drive the same graph.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Removes a run from the active set when the run ends.
struct ActiveRun<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.inner.runs.lock().remove(&self.id);
    }
}

impl Scheduler {
    /// Create a scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                graph: Mutex::new(CallGraph::new()),
                resolvers: RwLock::new(Vec::new()),
                tick_lock: tokio::sync::Mutex::new(()),
                ticks: AtomicU64::new(0),
                idle_ticks: AtomicU32::new(0),
                faulted: Mutex::new(HashSet::new()),
                runs: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a resolver, run at the start of every tick for the lifetime
    /// of the scheduler.
    pub fn on_dispatch<F, Fut>(&self, resolver: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let resolver: Resolver = Arc::new(move || resolver().boxed());
        self.inner.resolvers.write().push(resolver);
    }

    /// Run `root` to completion and report its result.
    pub async fn run(&self, root: Task) -> Result<Value, RunError> {
        let root_id = self.register(&root);
        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        self.inner.runs.lock().insert(run_id, None);
        let _active = ActiveRun {
            inner: &self.inner,
            id: run_id,
        };

        async {
            debug!(kind = root.kind(), "run started");
            loop {
                let tick = self.inner.tick_lock.lock().await;

                if let Some(result) = self.root_result(root_id) {
                    debug!(ok = result.is_ok(), "run finished");
                    return result;
                }
                if let Some(err) = self.abort_of(run_id) {
                    debug!(error = %err, "run aborted");
                    return Err(RunError::Aborted(err));
                }
                if let Err(err) = self.tick().await {
                    self.abort_active_runs(&err);
                }

                drop(tick);
                if self.inner.config.yield_between_ticks {
                    tokio::task::yield_now().await;
                }
            }
        }
        .instrument(debug_span!("run", run = run_id, root = %root_id))
        .await
    }

    /// Run `root` on a private current-thread runtime, blocking until done.
    ///
    /// Must not be called from within an async runtime.
    pub fn run_blocking(&self, root: Task) -> Result<Value, RunError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                RunError::Aborted(SchedulerError::Runtime {
                    message: err.to_string(),
                })
            })?;
        runtime.block_on(self.run(root))
    }

    /// Register `task` as a node if it has not been seen before.
    pub fn register(&self, task: &Task) -> NodeId {
        self.inner.graph.lock().id(task)
    }

    /// Outcome of `task`, if it has been registered.
    pub fn outcome(&self, task: &Task) -> Option<Outcome> {
        let graph = self.inner.graph.lock();
        let id = graph.get_id(task)?;
        graph.outcome(id).cloned()
    }

    pub fn is_ready(&self, id: NodeId) -> bool {
        self.inner.graph.lock().is_ready(id) && !self.inner.faulted.lock().contains(&id)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            graph: self.inner.graph.lock().counts(),
            resolvers: self.inner.resolvers.read().len(),
            active_runs: self.inner.runs.lock().len(),
        }
    }

    pub(crate) fn declare_waits(&self, node: NodeId, deps: &WaitSet<Task>) {
        self.inner.graph.lock().set_dependencies_of(node, deps);
    }

    /// What a resumed node receives: its first dependency failure, or the
    /// values it waited on.
    pub(crate) fn resume_input(&self, node: NodeId) -> Result<ResumeValue, TaskError> {
        let graph = self.inner.graph.lock();
        match graph.first_failure(node) {
            Some(err) => Err(err),
            None => Ok(graph.resume_value(node)),
        }
    }

    fn root_result(&self, root: NodeId) -> Option<Result<Value, RunError>> {
        match self.inner.graph.lock().outcome(root)? {
            Outcome::Pending => None,
            Outcome::Succeeded(value) => Some(Ok(value.clone())),
            Outcome::Failed(err) => Some(Err(RunError::Failed(err.clone()))),
        }
    }

    fn abort_of(&self, run_id: u64) -> Option<SchedulerError> {
        self.inner.runs.lock().get(&run_id).cloned().flatten()
    }

    fn abort_active_runs(&self, err: &SchedulerError) {
        let mut runs = self.inner.runs.lock();
        debug!(error = %err, runs = runs.len(), "aborting active runs");
        for slot in runs.values_mut() {
            slot.get_or_insert_with(|| err.clone());
        }
    }

    async fn tick(&self) -> Result<(), SchedulerError> {
        let tick = self.inner.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        async {
            self.dispatch().await?;

            let mut ready = self.inner.graph.lock().ready_ids();
            {
                let faulted = self.inner.faulted.lock();
                ready.retain(|id| !faulted.contains(id));
            }
            trace!(ready = ready.len(), "stepping ready nodes");
            self.note_progress(tick, ready.len());

            let steps: Vec<BoxFuture<'_, Result<(), SchedulerError>>> =
                ready.iter().map(|&id| self.step(id).boxed()).collect();
            let results: Vec<Result<(), SchedulerError>> =
                match self.inner.config.max_concurrent_steps {
                    Some(limit) => stream::iter(steps).buffer_unordered(limit.get()).collect().await,
                    None => join_all(steps).await,
                };
            results.into_iter().collect()
        }
        .instrument(debug_span!("tick", tick))
        .await
    }

    /// Resolution phase. Waits for every resolver even if one fails.
    async fn dispatch(&self) -> Result<(), SchedulerError> {
        let resolvers: Vec<Resolver> = self.inner.resolvers.read().clone();
        if resolvers.is_empty() {
            return Ok(());
        }

        let results = join_all(resolvers.iter().map(|resolver| resolver())).await;
        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(SchedulerError::Resolver {
                message: err.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn note_progress(&self, tick: u64, ready: usize) {
        if ready > 0 {
            self.inner.idle_ticks.store(0, Ordering::Relaxed);
            return;
        }
        let idle = self.inner.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let limit = self.inner.config.stall_warning_ticks;
        if limit > 0 && idle % limit == 0 {
            warn!(tick, idle, "no node has been ready for {idle} consecutive ticks");
        }
    }

    /// Advance one ready node by one step.
    async fn step(&self, id: NodeId) -> Result<(), SchedulerError> {
        let Some(task) = self.inner.graph.lock().obj(id).cloned() else {
            return Ok(());
        };

        match task.runnable() {
            Runnable::Computation(slot) => {
                self.resume(id, slot);
            }
            Runnable::Deferred(slot) => {
                let start = slot.lock().take();
                if let Some(start) = start {
                    let (done, reported) = Completion::channel();
                    start(done);
                    let result = reported
                        .await
                        .unwrap_or_else(|_| Err(TaskError::completion_dropped()));
                    self.finish(id, result);
                }
            }
            Runnable::Eventual(slot) => {
                let future = slot.lock().take();
                if let Some(future) = future {
                    let result = future.await;
                    self.finish(id, result);
                }
            }
            Runnable::Opaque(value) => {
                debug!(node = %id, %value, "task cannot be stepped");
                self.inner.faulted.lock().insert(id);
                return Err(SchedulerError::Unsupported {
                    node: id,
                    kind: task.kind(),
                });
            }
        }
        Ok(())
    }

    /// Poll a computation once inside its run context.
    ///
    /// A pending poll means it declared a new wait set. Finished nodes are
    /// never ready, so the empty-slot branch is only a guard.
    fn resume(&self, id: NodeId, slot: &Mutex<Option<BoxFuture<'static, TaskResult>>>) {
        let mut slot = slot.lock();
        let Some(future) = slot.as_mut() else {
            trace!(node = %id, "computation already finished, resume ignored");
            return;
        };

        let polled = {
            let _ctx = RunContext::enter(id);
            future.as_mut().now_or_never()
        };

        if let Some(result) = polled {
            *slot = None;
            drop(slot);
            self.finish(id, result);
        }
    }

    /// Record a step's result. A failure reaches every node waiting on
    /// `id` the next time it resumes; a root failure ends its run.
    fn finish(&self, id: NodeId, result: TaskResult) {
        if let Err(err) = &result {
            debug!(node = %id, caller = ?RunContext::current(), error = %err, "node failed");
        }
        if !self.inner.graph.lock().set_outcome(id, result) {
            warn!(node = %id, "node already finished, second outcome ignored");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn run_returns_computation_value() {
        let scheduler = Scheduler::new();
        let result = scheduler
            .run(Task::computation(async { Ok(json!("test")) }))
            .await;
        assert_eq!(result, Ok(json!("test")));
    }

    #[tokio::test]
    async fn implicit_return_is_null() {
        let scheduler = Scheduler::new();
        let sched = scheduler.clone();
        let inner = Task::computation(async { Ok(json!(42)) });
        let root = Task::computation(async move {
            sched.wait(&inner).await?;
            Ok(Value::Null)
        });

        assert_eq!(scheduler.run(root).await, Ok(Value::Null));
    }

    #[tokio::test]
    async fn finished_root_returns_stored_value() {
        let scheduler = Scheduler::new();
        let root = Task::computation(async { Ok(json!(1)) });

        assert_eq!(scheduler.run(root.clone()).await, Ok(json!(1)));
        let ticks = scheduler.stats().ticks;

        // Not re-run: no further tick is needed.
        assert_eq!(scheduler.run(root).await, Ok(json!(1)));
        assert_eq!(scheduler.stats().ticks, ticks);
    }

    #[tokio::test]
    async fn root_failure_is_terminal() {
        let scheduler = Scheduler::new();
        let root = Task::computation(async { Err(TaskError::new("oops.")) });

        let result = scheduler.run(root.clone()).await;

        assert_eq!(result, Err(RunError::Failed(TaskError::new("oops."))));
        assert!(matches!(scheduler.outcome(&root), Some(Outcome::Failed(_))));
    }

    #[tokio::test]
    async fn opaque_root_aborts_the_run() {
        let scheduler = Scheduler::new();
        let result = scheduler.run(Task::opaque(json!({"id": 1}))).await;

        match result {
            Err(RunError::Aborted(SchedulerError::Unsupported { kind, .. })) => {
                assert_eq!(kind, "opaque")
            }
            other => panic!("expected unsupported abort, got {other:?}"),
        }
        assert_eq!(scheduler.stats().active_runs, 0);
    }

    #[tokio::test]
    async fn unsupported_node_is_not_stepped_again() {
        let scheduler = Scheduler::new();
        let opaque = Task::opaque(json!(1));
        assert!(scheduler.run(opaque.clone()).await.is_err());

        let id = scheduler.register(&opaque);
        assert!(!scheduler.is_ready(id));
        assert_eq!(scheduler.outcome(&opaque), Some(Outcome::Pending));

        let sched = scheduler.clone();
        let later = Task::computation(async move {
            sched.wait_for_dispatch().await?;
            sched.wait_for_dispatch().await?;
            Ok(json!("later"))
        });
        assert_eq!(scheduler.run(later).await, Ok(json!("later")));
    }

    #[tokio::test]
    async fn deferred_and_eventual_tasks_report_back() {
        let scheduler = Scheduler::new();
        let sched = scheduler.clone();
        let deferred = Task::deferred(|done| {
            tokio::spawn(async move { done.succeed(json!("later")) });
        });
        let eventual = Task::eventual(async {
            tokio::task::yield_now().await;
            Ok(json!("eventually"))
        });
        let root = Task::computation(async move {
            let values = sched.wait_all([deferred, eventual]).await?;
            Ok(Value::Array(values))
        });

        assert_eq!(
            scheduler.run(root).await,
            Ok(json!(["later", "eventually"]))
        );
    }

    #[tokio::test]
    async fn dropped_completion_fails_the_node() {
        let scheduler = Scheduler::new();
        let sched = scheduler.clone();
        let deferred = Task::deferred(drop);
        let root = Task::computation(async move {
            match sched.wait(&deferred).await {
                Err(err) => Ok(json!(err.message())),
                Ok(_) => Ok(json!("no error")),
            }
        });

        assert_eq!(
            scheduler.run(root).await,
            Ok(json!(TaskError::completion_dropped().message()))
        );
    }

    #[tokio::test]
    async fn failing_resolver_aborts_after_all_resolvers_ran() {
        let scheduler = Scheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        scheduler.on_dispatch(|| async { Err::<(), BoxError>("db down".into()) });
        scheduler.on_dispatch(move || {
            let counter = counter.clone();
            async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let result = scheduler
            .run(Task::computation(async { Ok(Value::Null) }))
            .await;

        assert_eq!(
            result,
            Err(RunError::Aborted(SchedulerError::Resolver {
                message: "db down".into()
            }))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_step_concurrency_still_completes() {
        let config = SchedulerConfig::default()
            .with_max_concurrent_steps(std::num::NonZeroUsize::new(2).unwrap());
        let scheduler = Scheduler::with_config(config);
        let sched = scheduler.clone();
        let root = Task::computation(async move {
            let deps = (0..10).map(|n| Task::computation(async move { Ok(json!(n)) }));
            let values = sched.wait_all(deps).await?;
            Ok(json!(values.iter().filter_map(Value::as_i64).sum::<i64>()))
        });

        assert_eq!(scheduler.run(root).await, Ok(json!(45)));
    }

    #[tokio::test]
    async fn runs_without_yielding_between_ticks() {
        let scheduler = Scheduler::with_config(
            SchedulerConfig::default().with_yield_between_ticks(false),
        );
        let sched = scheduler.clone();
        let root = Task::computation(async move {
            let first = sched.wait(&Task::computation(async { Ok(json!(1)) })).await?;
            sched.wait_for_dispatch().await?;
            let second = sched.wait(&Task::computation(async { Ok(json!(2)) })).await?;
            Ok(json!([first, second]))
        });

        assert_eq!(scheduler.run(root).await, Ok(json!([1, 2])));
        assert!(scheduler.stats().ticks >= 4);
    }

    #[test]
    fn idle_ticks_count_up_until_progress() {
        let config = SchedulerConfig::default().with_stall_warning_ticks(2);
        let scheduler = Scheduler::with_config(config);
        let idle = || scheduler.inner.idle_ticks.load(Ordering::Relaxed);

        scheduler.note_progress(1, 0);
        scheduler.note_progress(2, 0);
        scheduler.note_progress(3, 0);
        assert_eq!(idle(), 3);

        scheduler.note_progress(4, 5);
        assert_eq!(idle(), 0);
    }

    #[test]
    fn disabled_stall_warning_still_counts() {
        let config = SchedulerConfig::default().with_stall_warning_ticks(0);
        let scheduler = Scheduler::with_config(config);

        for tick in 1..=10 {
            scheduler.note_progress(tick, 0);
        }
        assert_eq!(scheduler.inner.idle_ticks.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn resume_on_an_emptied_slot_changes_nothing() {
        let scheduler = Scheduler::new();
        let task = Task::computation(async { Ok(json!(1)) });
        let id = scheduler.register(&task);

        let Runnable::Computation(slot) = task.runnable() else {
            panic!("expected a computation");
        };
        drop(slot.lock().take());
        scheduler.resume(id, slot);

        assert_eq!(scheduler.outcome(&task), Some(Outcome::Pending));
        assert!(slot.lock().is_none());
    }

    #[test]
    fn run_blocking_drives_a_root() {
        let scheduler = Scheduler::new();
        let sched = scheduler.clone();
        let root = Task::computation(async move {
            let value = sched.wait(&Task::computation(async { Ok(json!(2)) })).await?;
            Ok(json!(value.as_i64().unwrap_or_default() * 21))
        });

        assert_eq!(scheduler.run_blocking(root), Ok(json!(42)));
    }
}
