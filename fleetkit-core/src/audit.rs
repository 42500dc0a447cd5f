//! Audit trail of the operations a service performs.
//!
//! Every event flattens the request [`Metadata`], optional extra fields and a
//! few derived values into one record. Fields are applied in priority order
//! (lowest first):
//!
//! 1. context metadata, keys normalised to lower snake case
//! 2. additional fields given by the caller
//! 3. derived `operation_time`
//! 4. `category`
//!
//! Attempts are expected to be followed by exactly one success or fail with
//! the same message. That pairing is not enforced.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::converters::to_snake_case;
use crate::metadata::Metadata;

/// `target` of the records written by [`JsonSink`].
pub const AUDIT_TARGET: &str = "audit";

pub const OPERATOR_KEY: &str = "operator";
pub const OPERATION_ID_KEY: &str = "operation_id";
pub const OPERATION_START_KEY: &str = "operation_start_datetime";
pub const OPERATION_TIME_KEY: &str = "operation_time";
pub const SERVICE_NAME_KEY: &str = "service_name";
pub const SERVICE_ENDPOINT_KEY: &str = "service_endpoint";

pub const OPERATION_ATTEMPT: &str = "operation_attempt";
pub const OPERATION_SUCCESS: &str = "operation_success";
pub const OPERATION_FAIL: &str = "operation_fail";

/// Flat field map attached to an audit record.
pub type AuditFields = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Attempt,
    Fact,
    Success,
    Fail,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Attempt => "attempt",
            AuditCategory::Fact => "fact",
            AuditCategory::Success => "success",
            AuditCategory::Fail => "fail",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub category: AuditCategory,
    pub message: String,
    /// Includes `category`; never includes `message`.
    pub fields: AuditFields,
}

impl AuditEvent {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field value as a string slice, when it is a JSON string.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Flat JSON object as it would appear in a log line.
    pub fn to_record(&self) -> Value {
        let mut record: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        record.insert("message".to_string(), Value::String(self.message.clone()));
        Value::Object(record)
    }
}

/// Destination of audit records.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Writes each record as one flat JSON object per line.
///
/// Every field sits at the top level next to `message`, `timestamp`, `level`
/// and `target`, so log shippers index `user_id` and friends directly.
#[derive(Debug)]
pub struct JsonSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> AuditSink for JsonSink<W> {
    fn emit(&self, event: &AuditEvent) {
        let mut record = match event.to_record() {
            Value::Object(record) => record,
            _ => return,
        };
        record
            .entry("timestamp")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)));
        record.entry("level").or_insert_with(|| Value::String("INFO".to_string()));
        record.entry("target").or_insert_with(|| Value::String(AUDIT_TARGET.to_string()));

        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, &record)
            .map_err(io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
        if let Err(err) = written {
            warn!(error = %err, message = %event.message, "failed to write audit record");
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Reasons `operation_time` could not be derived.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperationTimeError {
    #[error("expected a string for operation_start_datetime, got {0}")]
    NotAString(String),

    #[error("unable to parse operation_start_datetime as RFC 3339: {0}")]
    Unparsable(String),

    #[error("operation_start_datetime should not contain a zero value")]
    ZeroValue,
}

// 0001-01-01T00:00:00Z
const ZERO_INSTANT_SECONDS: i64 = -62_135_596_800;

/// Milliseconds elapsed between `operation_start_datetime` and `now`.
///
/// `Ok(None)` when the start is absent.
pub fn derive_operation_time(
    fields: &AuditFields,
    now: DateTime<Utc>,
) -> Result<Option<String>, OperationTimeError> {
    let Some(raw) = fields.get(OPERATION_START_KEY) else {
        return Ok(None);
    };

    let raw = raw
        .as_str()
        .ok_or_else(|| OperationTimeError::NotAString(json_type(raw).to_string()))?;

    let start = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| OperationTimeError::Unparsable(raw.to_string()))?;

    if start.timestamp() == ZERO_INSTANT_SECONDS && start.timestamp_subsec_nanos() == 0 {
        return Err(OperationTimeError::ZeroValue);
    }

    let elapsed = now.signed_duration_since(start.with_timezone(&Utc));
    Ok(Some(elapsed.num_milliseconds().to_string()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Lower snake case, with anything outside `[a-z0-9_]` turned into `_`.
fn normalise_key(key: &str) -> String {
    to_snake_case(key)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Seeds the operation bookkeeping keys into `context`.
pub fn start_operation(context: &Metadata, operator: &str) -> Metadata {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let seeded = Metadata::from_iter([
        (OPERATOR_KEY, operator.to_string()),
        (OPERATION_ID_KEY, Uuid::new_v4().to_string()),
        (OPERATION_START_KEY, now),
        (OPERATION_TIME_KEY, "0".to_string()),
    ]);
    context.merged_with(Some(&seeded))
}

/// Stores `value` in `context` under `<service>_<key>`, both snake cased.
pub fn add_audit_info(context: &Metadata, service: &str, key: &str, value: &str) -> Metadata {
    context.with(audit_info_key(service, key), value)
}

/// Map variant of [`add_audit_info`].
pub fn add_audit_info_map(context: &Metadata, service: &str, info: Option<&Metadata>) -> Metadata {
    let prefixed: Metadata = info
        .into_iter()
        .flat_map(Metadata::iter)
        .map(|(key, value)| (audit_info_key(service, key), value.clone()))
        .collect();
    context.merged_with(Some(&prefixed))
}

fn audit_info_key(service: &str, key: &str) -> String {
    format!("{}_{}", normalise_key(service), normalise_key(key))
}

/// Emits audit records to a sink.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Logger writing JSON lines to standard output.
    pub fn stdout() -> Self {
        Self::new(Arc::new(JsonSink::stdout()))
    }

    /// Builds, emits and returns one record.
    pub fn log_event(
        &self,
        context: &Metadata,
        message: &str,
        category: AuditCategory,
        additional: Option<AuditFields>,
    ) -> AuditEvent {
        let mut fields: AuditFields = context
            .iter()
            .map(|(key, value)| (normalise_key(key), Value::String(value.clone())))
            .collect();

        if let Some(additional) = additional {
            fields.extend(additional);
        }

        match derive_operation_time(&fields, Utc::now()) {
            Ok(Some(elapsed)) => {
                fields.insert(OPERATION_TIME_KEY.to_string(), Value::String(elapsed));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    field = OPERATION_START_KEY,
                    value = ?fields.get(OPERATION_START_KEY),
                    error = %err,
                    "could not derive operation_time"
                );
            }
        }

        fields.remove("message");
        fields.insert(
            "category".to_string(),
            Value::String(category.as_str().to_string()),
        );

        let event = AuditEvent {
            category,
            message: message.to_string(),
            fields,
        };
        self.sink.emit(&event);
        event
    }

    pub fn attempt(&self, context: &Metadata, message: &str, additional: Option<AuditFields>) -> AuditEvent {
        self.log_event(context, message, AuditCategory::Attempt, additional)
    }

    pub fn fact(&self, context: &Metadata, message: &str, additional: Option<AuditFields>) -> AuditEvent {
        self.log_event(context, message, AuditCategory::Fact, additional)
    }

    pub fn success(&self, context: &Metadata, message: &str, additional: Option<AuditFields>) -> AuditEvent {
        self.log_event(context, message, AuditCategory::Success, additional)
    }

    pub fn fail(&self, context: &Metadata, message: &str, additional: Option<AuditFields>) -> AuditEvent {
        self.log_event(context, message, AuditCategory::Fail, additional)
    }

    pub fn operation_attempt(&self, context: &Metadata, additional: Option<AuditFields>) -> AuditEvent {
        self.attempt(context, OPERATION_ATTEMPT, additional)
    }

    pub fn operation_success(&self, context: &Metadata, additional: Option<AuditFields>) -> AuditEvent {
        self.success(context, OPERATION_SUCCESS, additional)
    }

    pub fn operation_fail(&self, context: &Metadata, additional: Option<AuditFields>) -> AuditEvent {
        self.fail(context, OPERATION_FAIL, additional)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

/// Wraps an RPC style handler with an attempt and its outcome.
///
/// `service_name` and `service_endpoint` (lower case) are added to the context
/// handed to `handler`; the message is `<service>_<endpoint>`.
pub async fn audit_handler<F, Fut, T, E>(
    logger: &AuditLogger,
    context: &Metadata,
    service: &str,
    endpoint: &str,
    handler: F,
) -> Result<T, E>
where
    F: FnOnce(Metadata) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let service = service.to_lowercase();
    let endpoint = endpoint.to_lowercase();
    let message = format!("{service}_{endpoint}");

    let context = context.merged_with(Some(&Metadata::from_iter([
        (SERVICE_NAME_KEY, service),
        (SERVICE_ENDPOINT_KEY, endpoint),
    ])));

    logger.attempt(&context, &message, None);
    let result = handler(context.clone()).await;
    match &result {
        Ok(_) => logger.success(&context, &message, None),
        Err(_) => logger.fail(&context, &message, None),
    };
    result
}
