use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use digestline_common::config::{BudgetConfig, SelectionConfig};

/// Why the per-item loop ended before the work list ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxItems,
    TimeBudget,
    TargetReached,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxItems => write!(f, "max_items"),
            StopReason::TimeBudget => write!(f, "time_budget"),
            StopReason::TargetReached => write!(f, "target_reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

/// Limits for one run. Durations are wall clock.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    pub target_items: usize,
    pub max_items: usize,
    pub max_duration: Duration,
    pub per_item_estimate: Duration,
    pub safety_buffer: Duration,
}

impl RunBudget {
    pub fn from_config(selection: &SelectionConfig, budget: &BudgetConfig) -> Self {
        Self {
            target_items: selection.target_items,
            max_items: selection.max_items,
            max_duration: Duration::from_secs(budget.max_duration_secs),
            per_item_estimate: Duration::from_secs(budget.per_item_estimate_secs),
            safety_buffer: Duration::from_secs(budget.safety_buffer_secs),
        }
    }
}

/// Decides before each work item whether the run may start another one.
///
/// Below the target it keeps going as long as one more item fits in the
/// remaining time. At or past the target it only continues when there is
/// room for two more, so a run that has met its target never starts an item
/// it may not finish.
pub struct BudgetSupervisor {
    budget: RunBudget,
    started: Instant,
    processed: usize,
}

impl BudgetSupervisor {
    pub fn new(budget: RunBudget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            processed: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Count one processed item, whatever its outcome.
    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub fn decide(&self) -> Decision {
        self.decide_at(self.elapsed())
    }

    /// The decision given `elapsed` wall time since the run started.
    pub fn decide_at(&self, elapsed: Duration) -> Decision {
        let b = &self.budget;
        if self.processed >= b.max_items {
            return Decision::Stop(StopReason::MaxItems);
        }

        let remaining = b.max_duration.saturating_sub(elapsed);
        let one_more = b.per_item_estimate + b.safety_buffer;

        if self.processed < b.target_items {
            if remaining < one_more {
                return Decision::Stop(StopReason::TimeBudget);
            }
            return Decision::Continue;
        }

        if remaining >= b.per_item_estimate * 2 + b.safety_buffer {
            Decision::Continue
        } else {
            Decision::Stop(StopReason::TargetReached)
        }
    }

    pub fn log_status(&self) {
        let elapsed = self.elapsed();
        info!(
            processed = self.processed,
            target = self.budget.target_items,
            max = self.budget.max_items,
            elapsed_secs = elapsed.as_secs(),
            remaining_secs = self.budget.max_duration.saturating_sub(elapsed).as_secs(),
            "Budget status"
        );
    }
}
