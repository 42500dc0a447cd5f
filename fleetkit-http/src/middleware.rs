use std::error::Error as _;

use axum::body::{self, Body, Bytes};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fleetkit_core::audit::{start_operation, AuditFields, AuditLogger};
use fleetkit_core::metadata::Metadata;
use fleetkit_core::structured_error::{StructuredError, ERROR_DOMAIN};
use http_body_util::LengthLimitError;
use serde_json::Value;
use tracing::warn;

use crate::error::ApiError;
use crate::propagation::set_request_metadata;

const ERROR_SUB_DOMAIN: &str = "http";

pub const ERROR_REQUEST_BODY_TOO_LARGE: &str = "request_body_too_large";
pub const ERROR_READ_REQUEST_BODY_FAILED: &str = "read_request_body_failed";
pub const ERROR_READ_RESPONSE_BODY_FAILED: &str = "read_response_body_failed";

/// Largest body buffered for the audit trail, same as axum's `DefaultBodyLimit`.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// State for [`audit_operation`].
#[derive(Debug, Clone)]
pub struct AuditState {
    operator: String,
    logger: AuditLogger,
    body_limit: usize,
}

impl AuditState {
    /// `operator` names the API doing the work (e.g. `booking-api`).
    pub fn new(operator: impl Into<String>, logger: AuditLogger) -> Self {
        Self {
            operator: operator.into(),
            logger,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Caps the request and response bodies buffered by the middleware.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }
}

/// Logs an operation attempt for every request and its outcome.
///
/// The operation keys are seeded into the request metadata so handlers (and
/// the calls they forward) share the same `operation_id`.
///
/// A request body that cannot be read, or exceeds the body limit, is answered
/// with a 400 or 413 without running the handler. A response body that cannot
/// be read becomes a 500. Both are audited as failures.
///
/// ```ignore
/// let app = Router::new()
///     .route("/orders", post(create_order))
///     .layer(from_fn_with_state(AuditState::new("orders-api", logger), audit_operation))
///     .layer(from_fn(propagate_metadata));
/// ```
pub async fn audit_operation(
    State(state): State<AuditState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let seeded = parts.extensions.get::<Metadata>().cloned().unwrap_or_default();
    let context = start_operation(&seeded, &state.operator);

    let mut additional = AuditFields::new();
    additional.insert("http_method".into(), Value::String(parts.method.to_string()));
    additional.insert("http_path".into(), Value::String(parts.uri.path().to_string()));

    let request_payload = match body::to_bytes(body, state.body_limit).await {
        Ok(payload) => payload,
        Err(err) => {
            let (status, sub_domain_code) = if exceeds_limit(&err) {
                (StatusCode::PAYLOAD_TOO_LARGE, ERROR_REQUEST_BODY_TOO_LARGE)
            } else {
                (StatusCode::BAD_REQUEST, ERROR_READ_REQUEST_BODY_FAILED)
            };
            warn!(method = %parts.method, path = parts.uri.path(), error = %err, "unable to read request body");

            state.logger.operation_attempt(&context, Some(additional.clone()));
            additional.insert("http_status".into(), Value::from(status.as_u16()));
            state.logger.operation_fail(&context, Some(additional));
            return body_error(status, sub_domain_code, &parts.method, parts.uri.path());
        }
    };

    let mut request = Request::from_parts(parts, Body::from(request_payload.clone()));
    set_request_metadata(&mut request, context.clone());

    additional.insert("request_payload".into(), payload_text(&request_payload));
    state.logger.operation_attempt(&context, Some(additional.clone()));

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let response_payload = match body::to_bytes(body, state.body_limit).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%method, path = %path, status = parts.status.as_u16(), error = %err, "unable to read response body");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            additional.insert("http_status".into(), Value::from(status.as_u16()));
            state.logger.operation_fail(&context, Some(additional));
            return body_error(status, ERROR_READ_RESPONSE_BODY_FAILED, &method, &path);
        }
    };

    additional.insert("http_status".into(), Value::from(parts.status.as_u16()));
    additional.insert("response_payload".into(), payload_text(&response_payload));

    if parts.status.as_u16() < 300 {
        state.logger.operation_success(&context, Some(additional));
    } else {
        state.logger.operation_fail(&context, Some(additional));
    }

    Response::from_parts(parts, Body::from(response_payload))
}

fn exceeds_limit(err: &axum::Error) -> bool {
    err.source()
        .is_some_and(|source| source.is::<LengthLimitError>())
}

fn body_error(status: StatusCode, sub_domain_code: &str, method: &Method, path: &str) -> Response {
    let meta = Metadata::from_iter([("http_method", method.as_str()), ("http_path", path)]);
    ApiError(StructuredError::new(
        status.as_u16(),
        ERROR_DOMAIN,
        ERROR_SUB_DOMAIN,
        sub_domain_code,
        Some(meta),
    ))
    .into_response()
}

fn payload_text(payload: &Bytes) -> Value {
    Value::String(String::from_utf8_lossy(payload).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use axum::middleware::from_fn_with_state;
    use axum::routing::{get, post};
    use axum::Router;
    use fleetkit_core::audit::{AuditCategory, MemorySink, OPERATION_ID_KEY, OPERATION_START_KEY};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::propagation::RequestMetadata;

    async fn create(RequestMetadata(metadata): RequestMetadata, body: String) -> (StatusCode, String) {
        if body.is_empty() {
            return (StatusCode::UNPROCESSABLE_ENTITY, "empty".to_string());
        }
        (StatusCode::CREATED, metadata.get(OPERATION_ID_KEY).to_string())
    }

    async fn broken_export() -> Response {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"id,total\n")),
            Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        ];
        Body::from_stream(futures::stream::iter(chunks)).into_response()
    }

    fn app_with_state(state: AuditState) -> Router {
        Router::new()
            .route("/orders", post(create))
            .route("/orders/export", get(broken_export))
            .layer(from_fn_with_state(state, audit_operation))
    }

    fn app(sink: Arc<MemorySink>) -> Router {
        app_with_state(AuditState::new("orders-api", AuditLogger::new(sink)))
    }

    fn categories(sink: &MemorySink) -> Vec<AuditCategory> {
        sink.events().iter().map(|event| event.category).collect()
    }

    async fn error_detail(response: Response) -> String {
        let body = response.into_body().collect().await.expect("body").to_bytes();
        StructuredError::parse(std::str::from_utf8(&body).expect("utf8")).detail_string()
    }

    fn post_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/orders")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn success_is_paired_with_attempt() {
        let sink = Arc::new(MemorySink::new());

        let response = app(sink.clone()).oneshot(post_request("{\"qty\":1}")).await.expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.expect("body").to_bytes();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        let (attempt, success) = (&events[0], &events[1]);

        assert_eq!(attempt.category, AuditCategory::Attempt);
        assert_eq!(success.category, AuditCategory::Success);
        assert_eq!(attempt.field_str("operator"), Some("orders-api"));
        assert_eq!(attempt.field_str("request_payload"), Some("{\"qty\":1}"));
        assert_eq!(
            attempt.field_str(OPERATION_START_KEY),
            success.field_str(OPERATION_START_KEY)
        );
        assert_eq!(success.field_str(OPERATION_ID_KEY), std::str::from_utf8(&body).ok());
        assert_eq!(success.field("http_status"), Some(&Value::from(201)));
        assert!(success.field("response_payload").is_some());
    }

    #[tokio::test]
    async fn error_status_is_a_fail() {
        let sink = Arc::new(MemorySink::new());

        let response = app(sink.clone()).oneshot(post_request("")).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(categories(&sink), vec![AuditCategory::Attempt, AuditCategory::Fail]);
        assert_eq!(sink.events()[1].field_str("response_payload"), Some("empty"));
    }

    #[tokio::test]
    async fn interrupted_request_body_is_rejected_before_the_handler() {
        let sink = Arc::new(MemorySink::new());
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"qty\":")),
            Err(io::Error::from(io::ErrorKind::ConnectionReset)),
        ];
        let request = Request::builder()
            .method("POST")
            .uri("/orders")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .expect("request");

        let response = app(sink.clone()).oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_detail(response).await,
            "fleetkit/http/read_request_body_failed/http_method=POST;http_path=_orders"
        );
        assert_eq!(categories(&sink), vec![AuditCategory::Attempt, AuditCategory::Fail]);
        assert_eq!(sink.events()[1].field("http_status"), Some(&Value::from(400)));
    }

    #[tokio::test]
    async fn oversized_request_body_is_a_413() {
        let sink = Arc::new(MemorySink::new());
        let state = AuditState::new("orders-api", AuditLogger::new(sink.clone())).with_body_limit(8);

        let response = app_with_state(state)
            .oneshot(post_request("{\"qty\":1,\"note\":\"too long\"}"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(error_detail(response).await.starts_with("fleetkit/http/request_body_too_large/"));
        assert_eq!(categories(&sink), vec![AuditCategory::Attempt, AuditCategory::Fail]);
        assert_eq!(sink.events()[1].field("http_status"), Some(&Value::from(413)));
    }

    #[tokio::test]
    async fn unreadable_response_body_becomes_a_500() {
        let sink = Arc::new(MemorySink::new());
        let request = Request::builder()
            .method("GET")
            .uri("/orders/export")
            .body(Body::empty())
            .expect("request");

        let response = app(sink.clone()).oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error_detail(response).await.starts_with("fleetkit/http/read_response_body_failed/"));
        assert_eq!(categories(&sink), vec![AuditCategory::Attempt, AuditCategory::Fail]);
        assert_eq!(sink.events()[1].field("http_status"), Some(&Value::from(500)));
    }
}
