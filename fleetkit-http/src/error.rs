use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use fleetkit_core::structured_error::StructuredError;
use tracing::error;

/// Handler error rendered as the structured error envelope.
///
/// The HTTP status is the error code; unknown or out-of-range codes become
/// 500. Clients recover the error with `StructuredError::parse` on the body.
#[derive(Debug, Clone)]
pub struct ApiError(pub StructuredError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<StructuredError> for ApiError {
    fn from(value: StructuredError) -> Self {
        ApiError(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0.detail_string(), code = self.0.code(), "request failed");
        }

        let mut response = (status, self.0.to_error_string()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
