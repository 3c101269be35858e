#![forbid(unsafe_code)]

//! Scheduler configuration.

use web_time::Duration;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of tasks a single `run_until_idle`/`run_until` call may
    /// execute before giving up with `BudgetExhausted`.
    /// Default: 1_000_000.
    pub max_tasks_per_run: usize,

    /// Virtual time the clock starts at.
    /// Default: zero.
    pub start_at: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_run: 1_000_000,
            start_at: Duration::ZERO,
        }
    }
}

impl SchedulerConfig {
    /// Set the per-run task budget.
    #[must_use]
    pub fn with_max_tasks_per_run(mut self, limit: usize) -> Self {
        self.max_tasks_per_run = limit;
        self
    }

    /// Set the starting virtual time.
    #[must_use]
    pub fn with_start_at(mut self, start_at: Duration) -> Self {
        self.start_at = start_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_tasks_per_run, 1_000_000);
        assert_eq!(config.start_at, Duration::ZERO);
    }

    #[test]
    fn builders_override_fields() {
        let config = SchedulerConfig::default()
            .with_max_tasks_per_run(8)
            .with_start_at(Duration::from_millis(250));
        assert_eq!(config.max_tasks_per_run, 8);
        assert_eq!(config.start_at, Duration::from_millis(250));
    }
}
