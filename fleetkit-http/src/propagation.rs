//! Carries [`Metadata`] across HTTP hops.
//!
//! Outbound calls encode the carrier in the [`METADATA_HEADER`] header;
//! inbound requests decode it once in [`propagate_metadata`] and keep it in
//! the request extensions for the handlers.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fleetkit_core::metadata::{Metadata, ERROR_DECODE_BINARY_FROM_BASE64_FAILED};
use fleetkit_core::structured_error::{ErrorKind, StructuredError, ERROR_DOMAIN};
use tracing::{debug, warn};

use crate::error::ApiError;

/// Header holding the base64 form of the carrier.
pub const METADATA_HEADER: &str = "x-fleet-metadata";

/// Decodes the carrier from `headers`. A missing header yields an empty carrier.
pub fn metadata_from_headers(headers: &HeaderMap) -> Result<Metadata, StructuredError> {
    let Some(value) = headers.get(METADATA_HEADER) else {
        return Ok(Metadata::new());
    };

    let raw = value.to_str().map_err(|err| {
        warn!(error = %err, "metadata header is not valid ASCII");
        StructuredError::new(
            400,
            ERROR_DOMAIN,
            "metadata",
            ERROR_DECODE_BINARY_FROM_BASE64_FAILED,
            None,
        )
        .with_kind(ErrorKind::DecodeFailure)
    })?;

    Metadata::from_base64(raw)
}

/// Writes the carrier into `headers`, replacing any previous value.
pub fn insert_metadata_header(headers: &mut HeaderMap, metadata: &Metadata) {
    match HeaderValue::from_str(&metadata.to_base64()) {
        Ok(value) => {
            headers.insert(METADATA_HEADER, value);
        }
        Err(err) => warn!(error = %err, "unable to encode metadata header"),
    }
}

/// Carrier stored on the request, or an empty one.
pub fn request_metadata<B>(request: &Request<B>) -> Metadata {
    request
        .extensions()
        .get::<Metadata>()
        .cloned()
        .unwrap_or_default()
}

pub fn set_request_metadata<B>(request: &mut Request<B>, metadata: Metadata) {
    request.extensions_mut().insert(metadata);
}

/// Merges `additional` into the stored carrier and returns the result.
pub fn update_request_metadata<B>(request: &mut Request<B>, additional: &Metadata) -> Metadata {
    let merged = request_metadata(request).merged_with(Some(additional));
    set_request_metadata(request, merged.clone());
    merged
}

/// Decodes the inbound carrier into the request extensions.
///
/// Requests with a corrupt header are rejected with 400.
pub async fn propagate_metadata(mut request: Request<Body>, next: Next) -> Response {
    let metadata = match metadata_from_headers(request.headers()) {
        Ok(metadata) => metadata,
        Err(err) => return ApiError::from(err).into_response(),
    };

    debug!(keys = metadata.len(), "metadata received");
    let metadata = request_metadata(&request).merged_with(Some(&metadata));
    set_request_metadata(&mut request, metadata);

    next.run(request).await
}

/// Extractor for the carrier set by [`propagate_metadata`].
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata(pub Metadata);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMetadata {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestMetadata(
            parts.extensions.get::<Metadata>().cloned().unwrap_or_default(),
        ))
    }
}
