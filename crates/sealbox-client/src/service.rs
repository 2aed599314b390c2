use std::sync::Arc;

use async_trait::async_trait;
use sealbox_core::{
    AccessLogEntry, Failure, FailureKind, ShareGrant, ShareMetadata, ShareReceipt, ShareToken,
    StatsSnapshot, UploadPayload,
};
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures reported by a share service. Messages are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Token unknown, expired, or out of views
    #[error("{0}")]
    AccessDenied(String),

    /// The blob could not be fetched from its transfer location
    #[error("{0}")]
    TransferFailure(String),

    #[error("{0}")]
    Collaborator(String),
}

impl From<ServiceError> for Failure {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::AccessDenied(msg) => Failure::new(FailureKind::AccessDenied, msg),
            ServiceError::TransferFailure(msg) => Failure::new(FailureKind::TransferFailure, msg),
            ServiceError::Collaborator(msg) => Failure::new(FailureKind::CollaboratorError, msg),
        }
    }
}

/// The remote share service as seen by the workflows.
///
/// `owner` scopes audit and statistics queries; it is optional everywhere.
#[async_trait]
pub trait ShareService: Send + Sync {
    /// Store a blob under a policy and return its token.
    async fn submit_upload(&self, payload: UploadPayload) -> ServiceResult<ShareReceipt>;

    /// Look up a share without charging a view.
    async fn peek_share(
        &self,
        token: &ShareToken,
        owner: Option<&str>,
    ) -> ServiceResult<ShareMetadata>;

    /// Charge one view and obtain a short-lived transfer URL.
    async fn consume_share(&self, token: &ShareToken, owner: Option<&str>)
        -> ServiceResult<ShareGrant>;

    /// Download the blob behind a transfer URL.
    async fn fetch_blob(&self, transfer_url: &str) -> ServiceResult<Vec<u8>>;

    async fn access_logs(&self, owner: Option<&str>) -> ServiceResult<Vec<AccessLogEntry>>;

    async fn stats(&self, owner: Option<&str>) -> ServiceResult<StatsSnapshot>;
}

#[async_trait]
impl<S: ShareService + ?Sized> ShareService for Arc<S> {
    async fn submit_upload(&self, payload: UploadPayload) -> ServiceResult<ShareReceipt> {
        (**self).submit_upload(payload).await
    }

    async fn peek_share(
        &self,
        token: &ShareToken,
        owner: Option<&str>,
    ) -> ServiceResult<ShareMetadata> {
        (**self).peek_share(token, owner).await
    }

    async fn consume_share(
        &self,
        token: &ShareToken,
        owner: Option<&str>,
    ) -> ServiceResult<ShareGrant> {
        (**self).consume_share(token, owner).await
    }

    async fn fetch_blob(&self, transfer_url: &str) -> ServiceResult<Vec<u8>> {
        (**self).fetch_blob(transfer_url).await
    }

    async fn access_logs(&self, owner: Option<&str>) -> ServiceResult<Vec<AccessLogEntry>> {
        (**self).access_logs(owner).await
    }

    async fn stats(&self, owner: Option<&str>) -> ServiceResult<StatsSnapshot> {
        (**self).stats(owner).await
    }
}
