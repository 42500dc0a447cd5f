//! Classified failures that can cross process boundaries as plain text.
//!
//! A [`StructuredError`] carries a numeric status code and a three-level
//! classification (`domain/sub_domain/sub_domain_code`) plus a metadata bag.
//! Its detail string is the wire grammar shared by every service:
//!
//! ```text
//! <domain>/<sub_domain>/<sub_domain_code>/<key1>=<value1>;<key2>=<value2>
//! ```
//!
//! Text that does not follow the grammar is kept verbatim as an opaque
//! (legacy) error instead of being rejected.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metadata::Metadata;

/// Domain used for errors raised by the toolkit itself.
pub const ERROR_DOMAIN: &str = "fleetkit";

const DETAIL_SEPARATOR: char = '/';
const META_SEPARATOR: char = ';';
const PAIR_SEPARATOR: char = '=';
const DETAIL_PARTS: usize = 4;

/// Coarse failure taxonomy used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DecodeFailure,
    ValidationFailure,
    NotFound,
    SystemFailure,
    LegacyOpaqueFailure,
}

impl ErrorKind {
    /// Infers the kind from an HTTP-like status code.
    pub fn from_code(code: u16) -> Self {
        match code {
            404 => ErrorKind::NotFound,
            400..=499 => ErrorKind::ValidationFailure,
            _ => ErrorKind::SystemFailure,
        }
    }
}

/// Either the parsed classification or the raw text of an unparsable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    Structured {
        domain: String,
        sub_domain: String,
        sub_domain_code: String,
        meta: Metadata,
    },
    Opaque(String),
}

/// Immutable classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    id: String,
    code: u16,
    status: String,
    detail: ErrorDetail,
    kind: ErrorKind,
}

/// JSON envelope used when an error is transmitted between services.
#[derive(Debug, Serialize, Deserialize)]
struct TransportEnvelope {
    #[serde(default)]
    id: String,
    #[serde(default)]
    code: u16,
    detail: String,
    #[serde(default)]
    status: String,
}

impl StructuredError {
    /// Creates an error without any default metadata.
    pub fn new(
        code: u16,
        domain: impl Into<String>,
        sub_domain: impl Into<String>,
        sub_domain_code: impl Into<String>,
        meta: Option<Metadata>,
    ) -> Self {
        ErrorFactory::default().create(code, domain, sub_domain, sub_domain_code, meta)
    }

    /// Reconstructs an error from its transport form.
    ///
    /// Accepts either the JSON envelope produced by [`Self::to_error_string`]
    /// or a bare detail string. Never fails: anything that is not a four-part
    /// detail becomes an opaque error holding the original text.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<TransportEnvelope>(raw) {
            Ok(envelope) => {
                let mut error = Self::from_detail(&envelope.detail);
                error.id = envelope.id;
                error.code = envelope.code;
                error.status = envelope.status;
                if !error.is_legacy_error() {
                    error.kind = ErrorKind::from_code(error.code);
                }
                error
            }
            Err(_) => Self::from_detail(raw),
        }
    }

    /// Parses a bare detail string. `id`, `code` and `status` stay empty.
    pub fn from_detail(detail: &str) -> Self {
        let parts: Vec<&str> = detail.split(DETAIL_SEPARATOR).collect();
        if parts.len() != DETAIL_PARTS {
            warn!(detail, "error received with legacy format");
            return Self {
                id: String::new(),
                code: 0,
                status: String::new(),
                detail: ErrorDetail::Opaque(detail.to_string()),
                kind: ErrorKind::LegacyOpaqueFailure,
            };
        }

        let meta: Metadata = parts[3]
            .split(META_SEPARATOR)
            .filter_map(|pair| pair.split_once(PAIR_SEPARATOR))
            .collect();

        Self {
            id: String::new(),
            code: 0,
            status: String::new(),
            detail: ErrorDetail::Structured {
                domain: parts[0].to_string(),
                sub_domain: parts[1].to_string(),
                sub_domain_code: parts[2].to_string(),
                meta,
            },
            kind: ErrorKind::SystemFailure,
        }
    }

    /// Overrides the inferred kind.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    pub fn is_legacy_error(&self) -> bool {
        matches!(self.detail, ErrorDetail::Opaque(_))
    }

    /// Domain of the error, or the full raw text for opaque errors.
    pub fn domain(&self) -> &str {
        match &self.detail {
            ErrorDetail::Structured { domain, .. } => domain,
            ErrorDetail::Opaque(raw) => raw,
        }
    }

    pub fn sub_domain(&self) -> &str {
        match &self.detail {
            ErrorDetail::Structured { sub_domain, .. } => sub_domain,
            ErrorDetail::Opaque(_) => "",
        }
    }

    /// Machine-readable failure code. Callers branch on this value.
    pub fn sub_domain_code(&self) -> &str {
        match &self.detail {
            ErrorDetail::Structured {
                sub_domain_code, ..
            } => sub_domain_code,
            ErrorDetail::Opaque(_) => "",
        }
    }

    pub fn meta(&self) -> Metadata {
        match &self.detail {
            ErrorDetail::Structured { meta, .. } => meta.clone(),
            ErrorDetail::Opaque(_) => Metadata::new(),
        }
    }

    /// Canonical detail string, see the module documentation.
    ///
    /// `=`, `;` and `/` inside metadata values are replaced with `_`.
    pub fn detail_string(&self) -> String {
        match &self.detail {
            ErrorDetail::Opaque(raw) => raw.clone(),
            ErrorDetail::Structured {
                domain,
                sub_domain,
                sub_domain_code,
                meta,
            } => {
                let meta_string = meta
                    .iter()
                    .map(|(key, value)| format!("{key}={}", escape_meta_value(value)))
                    .collect::<Vec<_>>()
                    .join(";");
                format!("{domain}/{sub_domain}/{sub_domain_code}/{meta_string}")
            }
        }
    }

    /// JSON transport form embedding id, code, detail string and status.
    pub fn to_error_string(&self) -> String {
        let envelope = TransportEnvelope {
            id: self.id.clone(),
            code: self.code,
            detail: self.detail_string(),
            status: self.status.clone(),
        };
        serde_json::to_string(&envelope).unwrap_or_else(|_| self.detail_string())
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_error_string())
    }
}

impl std::error::Error for StructuredError {}

fn escape_meta_value(value: &str) -> String {
    value.replace([PAIR_SEPARATOR, META_SEPARATOR, DETAIL_SEPARATOR], "_")
}

fn status_text(code: u16) -> String {
    http::StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// Builds errors seeded with a fixed set of default metadata.
///
/// Services usually create one factory at startup (for instance carrying the
/// service name) and share it.
#[derive(Debug, Clone, Default)]
pub struct ErrorFactory {
    default_meta: Metadata,
}

impl ErrorFactory {
    pub fn new(default_meta: Metadata) -> Self {
        Self { default_meta }
    }

    pub fn default_meta(&self) -> &Metadata {
        &self.default_meta
    }

    /// Creates an error stamped with the current UTC time as its id.
    ///
    /// Caller metadata wins over the factory defaults.
    pub fn create(
        &self,
        code: u16,
        domain: impl Into<String>,
        sub_domain: impl Into<String>,
        sub_domain_code: impl Into<String>,
        meta: Option<Metadata>,
    ) -> StructuredError {
        StructuredError {
            id: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            code,
            status: status_text(code),
            detail: ErrorDetail::Structured {
                domain: domain.into(),
                sub_domain: sub_domain.into(),
                sub_domain_code: sub_domain_code.into(),
                meta: self.default_meta.merged_with(meta.as_ref()),
            },
            kind: ErrorKind::from_code(code),
        }
    }
}
