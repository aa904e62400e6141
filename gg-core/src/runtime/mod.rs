//! Runtime
//!
//! Everything that executes tasks: the scheduler and its tick loop, the
//! task handle, the run context, and the wait points computations suspend
//! on.
//!
//! # Concepts
//!
//! ## Tasks
//!
//! A [`Task`] wraps something runnable: an async computation, a deferred
//! callback, an eventual value, or an opaque value that can only be waited
//! on. Tasks are identified by reference, so the same task waited on from
//! two places runs once.
//!
//! ## Wait points
//!
//! Inside a computation, `scheduler.wait(&task).await` declares a
//! dependency and suspends. The scheduler resumes the computation once the
//! dependency has finished, with its value or its error.
//!
//! ## Resolvers
//!
//! A resolver registered with [`Scheduler::on_dispatch`] runs at the start
//! of every tick. Batch loaders use it to fetch every key queued since the
//! previous tick in a single call.

mod config;
mod context;
mod scheduler;
mod task;
mod wait;

pub use config::SchedulerConfig;
pub use context::RunContext;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{Completion, Task};
pub use wait::{Wait, WaitAll};
