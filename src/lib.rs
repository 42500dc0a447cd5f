//! Fleetkit: shared plumbing for fleet management services.
//!
//! The toolkit is split into three crates, re-exported here:
//!
//! * `fleetkit_core`: structured errors, metadata, audit logging,
//!   authorization, sanitization, converters, configuration and logging setup
//! * `fleetkit_http`: outbound client, metadata propagation and audit middleware
//! * `fleetkit_store`: document repositories over Postgres JSONB or memory

pub use fleetkit_core;
pub use fleetkit_http;
pub use fleetkit_store;

pub use fleetkit_core::{
    AuditLogger, CoreError, CoreResult, ErrorFactory, ErrorKind, Metadata, StructuredError,
};
pub use fleetkit_http::{ApiError, HttpClient, RequestOptions};
pub use fleetkit_store::{DocumentRepository, Query};
