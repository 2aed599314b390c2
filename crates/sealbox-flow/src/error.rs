use sealbox_core::{Failure, FailureKind};
use thiserror::Error;

/// Input rejected before any work starts. The workflow state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no file selected")]
    MissingFile,

    #[error("file is empty")]
    EmptyFile,

    #[error("password is empty")]
    EmptyPassword,

    #[error("share token is empty")]
    EmptyToken,

    #[error("{0}")]
    Policy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot handle {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    /// The attempt ran and ended in the workflow's `Error` state
    #[error(transparent)]
    Failed(#[from] Failure),
}

impl FlowError {
    /// Failure classification, for callers that report every error uniformly
    pub fn kind(&self) -> FailureKind {
        match self {
            FlowError::Validation(_) => FailureKind::Validation,
            FlowError::InvalidTransition { .. } => FailureKind::Internal,
            FlowError::Failed(f) => f.kind,
        }
    }
}
