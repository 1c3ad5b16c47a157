//! Record and scheduler state machines.

use serde::{Deserialize, Serialize};

/// Logical state of a queued record.
///
/// Derived from `failure_count` rather than stored:
/// - Pending: `failure_count < max_failures`, eligible for selection
/// - Abandoned: `failure_count >= max_failures`, kept until an operator purges it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Abandoned,
}

impl RecordState {
    pub fn classify(failure_count: u32, max_failures: u32) -> Self {
        if failure_count >= max_failures {
            RecordState::Abandoned
        } else {
            RecordState::Pending
        }
    }

    pub fn is_selectable(self) -> bool {
        matches!(self, RecordState::Pending)
    }
}

/// Scheduler state for one outbox instance.
///
/// State transitions:
/// - Idle -> Running (trigger)
/// - Running -> RunningWithPendingRetrigger (trigger while a cycle runs)
/// - Running | RunningWithPendingRetrigger -> Running (cycle asked to re-run, or a trigger arrived)
/// - Running -> Idle (cycle finished, nothing pending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    RunningWithPendingRetrigger,
}

impl SchedulerState {
    pub fn is_idle(self) -> bool {
        matches!(self, SchedulerState::Idle)
    }

    /// State after a trigger arrives. Triggers while running collapse into one follow-up.
    pub fn on_trigger(self) -> Self {
        match self {
            SchedulerState::Idle => SchedulerState::Running,
            SchedulerState::Running | SchedulerState::RunningWithPendingRetrigger => {
                SchedulerState::RunningWithPendingRetrigger
            }
        }
    }

    /// State after a cycle completes. `rerun` is the cycle's own re-trigger decision.
    pub fn on_cycle_end(self, rerun: bool) -> Self {
        match self {
            SchedulerState::RunningWithPendingRetrigger => SchedulerState::Running,
            SchedulerState::Running if rerun => SchedulerState::Running,
            SchedulerState::Running | SchedulerState::Idle => SchedulerState::Idle,
        }
    }
}
