//! sealbox-flow: the two user-facing workflows
//!
//! Each workflow is an explicit state enum plus a pure `transition` function
//! that maps `(state, event)` to the next state and at most one command. The
//! async drivers ([`UploadFlow`], [`AccessFlow`]) execute commands against a
//! [`sealbox_client::ShareService`] and feed the results back as events.

pub mod access;
mod compute;
pub mod error;
mod rollback;
pub mod upload;

pub use access::{AccessFlow, AccessPolicy, AccessState, PendingShare, UnlockedFile};
pub use error::{FlowError, ValidationError};
pub use upload::{UploadFlow, UploadOutcome, UploadRequest, UploadState};

/// Callback invoked with every state a driver enters
pub type TransitionObserver<S> = Box<dyn Fn(&S) + Send + Sync>;
