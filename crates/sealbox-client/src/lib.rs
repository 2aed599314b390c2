//! sealbox-client: everything that talks to the share service
//!
//! The service stores opaque blobs under a policy (view budget, expiry) and
//! hands out tokens. It never sees passwords or plaintext of encrypted shares.

pub mod http;
pub mod link;
pub mod memory;
pub mod monitor;
pub mod service;

pub use http::HttpShareService;
pub use link::{build_share_link, parse_share_input};
pub use memory::{CallCounts, MemoryShareService};
pub use monitor::{poll_logs, poll_stats, MonitorUpdate};
pub use service::{ServiceError, ServiceResult, ShareService};
