pub mod config;
pub mod error;
pub mod types;

pub use error::{Failure, FailureKind, SealboxError, SealboxResult};
pub use types::{
    encrypted_filename, parse_timestamp, strip_encrypted_suffix, AccessLogEntry, ShareGrant,
    ShareMetadata, SharePolicy, ShareReceipt, ShareToken, StatsSnapshot, UploadPayload,
};

/// Filename suffix marking an encrypted upload
pub const ENCRYPTED_SUFFIX: &str = ".enc";
