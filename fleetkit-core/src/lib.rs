//! Core shared library for the fleetkit service toolkit.
//!
//! This crate exposes the primitives every service depends on: the request
//! metadata carrier, structured errors, audit logging, configuration
//! loading, logging setup and a handful of small helpers (converters,
//! sanitization, role checks, validation).

pub mod audit;
pub mod auth;
pub mod collections;
pub mod config;
pub mod converters;
pub mod errors;
pub mod logging;
pub mod metadata;
pub mod sanitize;
pub mod serde_utils;
pub mod structured_error;
pub mod validation;

pub use audit::{AuditCategory, AuditEvent, AuditFields, AuditLogger, AuditSink, JsonSink, MemorySink};
pub use errors::{CoreError, Result as CoreResult};
pub use metadata::Metadata;
pub use sanitize::Sanitizable;
pub use structured_error::{ErrorDetail, ErrorFactory, ErrorKind, StructuredError};
