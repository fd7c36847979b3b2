//! Flow state machine and UI-facing events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{InputKind, StepOutcome};

/// Where a flow currently is.
///
/// `Idle` → `Running` ⇄ `AwaitingInput` → `Completed` | `Aborted` | `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Running {
        step: String,
        index: usize,
        attempt: u32,
    },
    AwaitingInput {
        step: String,
        input: InputKind,
    },
    Completed,
    Aborted {
        reason: String,
    },
    Cancelled,
}

impl FlowState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, target),
            (Idle, Running { .. })
                | (Idle, Completed)
                | (Idle, Cancelled)
                | (Running { .. }, Running { .. })
                | (Running { .. }, AwaitingInput { .. })
                | (Running { .. }, Completed)
                | (Running { .. }, Aborted { .. })
                | (Running { .. }, Cancelled)
                | (AwaitingInput { .. }, Running { .. })
                | (AwaitingInput { .. }, Aborted { .. })
                | (AwaitingInput { .. }, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. } | Self::Cancelled)
    }

    /// Name of the step the flow is on, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Running { step, .. } | Self::AwaitingInput { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running {
                step, attempt: 1, ..
            } => write!(f, "running {step}"),
            Self::Running { step, attempt, .. } => write!(f, "running {step} (attempt {attempt})"),
            Self::AwaitingInput { step, input } => write!(f, "{step} awaiting {input}"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: FlowState,
    pub to: FlowState,
    pub timestamp: DateTime<Utc>,
}

/// Step-level progress broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    StepStarted {
        index: usize,
        step: String,
        attempt: u32,
    },
    StepSkipped {
        index: usize,
        step: String,
    },
    StepFinished {
        index: usize,
        step: String,
        outcome: StepOutcome,
    },
    RetryScheduled {
        index: usize,
        step: String,
        attempt: u32,
        delay_ms: u64,
    },
    AwaitingInput {
        step: String,
        input: InputKind,
    },
    InputAccepted {
        input: InputKind,
    },
    Finished {
        state: FlowState,
    },
}
