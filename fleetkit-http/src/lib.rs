//! HTTP plumbing for fleetkit services.
//!
//! - [`client`]: outbound JSON calls with structured failures.
//! - [`propagation`]: metadata header codec and the inbound middleware.
//! - [`middleware`]: audit attempt/outcome logging around every request.

pub mod client;
pub mod error;
pub mod middleware;
pub mod propagation;

pub use client::{unwrap_response_code_is_error, HttpClient, RawResponse, RequestOptions};
pub use error::ApiError;
pub use middleware::{audit_operation, AuditState};
pub use propagation::{propagate_metadata, RequestMetadata, METADATA_HEADER};
pub use reqwest::Method;
