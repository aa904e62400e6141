//! gg Core
//!
//! This crate provides a cooperative task scheduler that batches the
//! side-effecting fetches of many interdependent computations. It
//! implements:
//!
//! - An identity-keyed call graph of tasks and what they wait on
//! - A tick loop that runs batch resolvers, then advances every ready task
//! - Wait points through which computations suspend and receive results
//! - A cache-backed batch loader built on the dispatch hook
//!
//! Many computations can each ask for one record; the scheduler collects
//! all of their keys and the loader fetches them in a single call per tick.
//!
//! # Architecture
//!
//! - `graph`: Nodes, identity registry, readiness and resume values
//! - `runtime`: Scheduler, tasks, run context and wait points
//! - `loader`: Batch loader collaborator
//! - `error`: Task, scheduler and run errors
//!
//! # Example
//!
//! ```rust,ignore
//! use gg_core::{Scheduler, Task};
//! use serde_json::json;
//!
//! let scheduler = Scheduler::new();
//! let sched = scheduler.clone();
//!
//! let root = Task::computation(async move {
//!     let a = Task::computation(async { Ok(json!(1)) });
//!     let b = Task::computation(async { Ok(json!(2)) });
//!     let values = sched.wait_all([a, b]).await?;
//!     Ok(json!(values))
//! });
//!
//! assert_eq!(scheduler.run(root).await?, json!([1, 2]));
//! ```

pub mod error;
pub mod graph;
pub mod loader;
pub mod runtime;

pub use error::{BoxError, RunError, SchedulerError, TaskError, TaskResult};
pub use loader::BatchLoader;
pub use runtime::{Completion, Scheduler, SchedulerConfig, SchedulerStats, Task};
