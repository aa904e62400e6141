//! Scheduler configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on steps in flight within one tick. `None` runs every
    /// ready node at once. Either way the tick joins all of them before the
    /// next one starts.
    pub max_concurrent_steps: Option<NonZeroUsize>,

    /// Consecutive ticks with nothing ready before a stall warning is
    /// logged. Zero disables the warning.
    pub stall_warning_ticks: u32,

    /// Yield to the async runtime between ticks.
    pub yield_between_ticks: bool,
}

impl SchedulerConfig {
    pub fn with_max_concurrent_steps(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_steps = Some(limit);
        self
    }

    pub fn with_stall_warning_ticks(mut self, ticks: u32) -> Self {
        self.stall_warning_ticks = ticks;
        self
    }

    pub fn with_yield_between_ticks(mut self, enabled: bool) -> Self {
        self.yield_between_ticks = enabled;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: None,
            stall_warning_ticks: 1000,
            yield_between_ticks: true,
        }
    }
}
