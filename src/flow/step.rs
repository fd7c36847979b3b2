//! The setup step contract and its outcomes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contexts::SetupContexts;
use crate::error::{CloudError, ContextError, TransportError};
use crate::scopes::Scopes;

/// User input a step can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    TargetBarcode,
    CommissionerBarcode,
    DeviceName,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TargetBarcode => "target_barcode",
            Self::CommissionerBarcode => "commissioner_barcode",
            Self::DeviceName => "device_name",
        };
        write!(f, "{s}")
    }
}

/// Why a step may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Recoverable {
    /// Retry automatically after a back-off.
    Transient(String),
    /// Re-run once the user supplies this input.
    NeedsInput(InputKind),
}

/// Result of one run of a step. Outcomes are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    RecoverableFailure(Recoverable),
    FatalFailure(String),
    /// The step observed flow cancellation and committed nothing.
    Cancelled,
}

/// Step-internal failure, mapped to a [`StepOutcome`] at the step boundary.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("flow cancelled")]
    Cancelled,

    #[error("waiting for {0} input")]
    NeedsInput(InputKind),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl From<StepError> for StepOutcome {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Cancelled => Self::Cancelled,
            StepError::NeedsInput(kind) => {
                Self::RecoverableFailure(Recoverable::NeedsInput(kind))
            }
            StepError::Cloud(e) if e.is_transient() => {
                Self::RecoverableFailure(Recoverable::Transient(e.to_string()))
            }
            StepError::Transport(e) if e.is_transient() => {
                Self::RecoverableFailure(Recoverable::Transient(e.to_string()))
            }
            StepError::Transient(reason) => {
                Self::RecoverableFailure(Recoverable::Transient(reason))
            }
            other => Self::FatalFailure(other.to_string()),
        }
    }
}

impl From<Result<(), StepError>> for StepOutcome {
    fn from(result: Result<(), StepError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => e.into(),
        }
    }
}

/// One named, re-runnable unit of commissioning work.
///
/// Steps hold only collaborator references; all session state lives in
/// [`SetupContexts`]. A step whose goal is already met returns immediately.
#[async_trait]
pub trait SetupStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError>;

    async fn run(&self, ctxs: &SetupContexts, scopes: &Scopes) -> StepOutcome {
        if scopes.is_cancelled() {
            return StepOutcome::Cancelled;
        }
        self.run_step(ctxs, scopes).await.into()
    }
}
