use std::collections::BTreeMap;
use std::time::Duration;

use fleetkit_core::audit::AuditFields;
use fleetkit_core::config::ClientConfig;
use fleetkit_core::metadata::Metadata;
use fleetkit_core::structured_error::{StructuredError, ERROR_DOMAIN};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::propagation::METADATA_HEADER;

const ERROR_SUB_DOMAIN: &str = "http";

pub const ERROR_MARSHAL_REQUEST_BODY_FAILED: &str = "marshal_request_body_failed";
pub const ERROR_SEND_HTTP_REQUEST_FAILED: &str = "send_http_request_failed";
pub const ERROR_READ_RESPONSE_BODY_FAILED: &str = "read_response_body_failed";
pub const ERROR_RESPONSE_CODE_IS_ERROR: &str = "response_code_is_error";
pub const ERROR_PARSE_RESPONSE_BODY_FAILED: &str = "parse_response_body_failed";

/// Meta key holding the body of an error response.
pub const RESPONSE_BODY_KEY: &str = "response_body";

/// Per-call extras: query string, headers and the metadata to forward.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub metadata: Option<Metadata>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether a header is set, ignoring case.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }
}

/// Successful exchange as returned by [`HttpClient::call_raw`].
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub trace_id: String,
}

/// JSON-over-HTTP client bound to a root URL.
///
/// Every failure is reported as a [`StructuredError`] under `fleetkit/http`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    root_url: String,
}

impl HttpClient {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self::from_client(reqwest::Client::new(), root_url)
    }

    pub fn from_client(client: reqwest::Client, root_url: impl Into<String>) -> Self {
        Self {
            client,
            root_url: root_url.into(),
        }
    }

    /// Client honouring the configured timeout.
    pub fn with_config(root_url: impl Into<String>, config: &ClientConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self::from_client(client, root_url))
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Sends `body` as JSON and parses the JSON response into `R`.
    ///
    /// `content-type: application/json` is added only when there is a body,
    /// `accept: application/json` always; headers set by the caller win.
    ///
    /// An empty response body is parsed as `null`, so `()` and `Option<_>`
    /// work for endpoints without content.
    pub async fn call<B, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: &RequestOptions,
    ) -> Result<R, StructuredError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|err| {
                error!(%method, path, error = %err, "failed to marshal request body to JSON");
                http_error(500, ERROR_MARSHAL_REQUEST_BODY_FAILED, None)
            })?,
            None => Vec::new(),
        };

        let mut options = options.clone();
        if body.is_some() && !options.has_header("content-type") {
            options = options.header("content-type", "application/json");
        }
        if !options.has_header("accept") {
            options = options.header("accept", "application/json");
        }

        let response = self.call_raw(method.clone(), path, payload, &options).await?;

        let raw: &[u8] = if response.body.is_empty() {
            b"null"
        } else {
            &response.body
        };

        serde_json::from_slice(raw).map_err(|err| {
            error!(
                %method,
                path,
                trace_id = %response.trace_id,
                error = %err,
                "failed to parse response body from JSON"
            );
            http_error(421, ERROR_PARSE_RESPONSE_BODY_FAILED, None)
        })
    }

    /// Sends `body` untouched and returns the raw response.
    ///
    /// Status codes of 300 and above become `response_code_is_error` with the
    /// response status as code and the body under `response_body`.
    pub async fn call_raw(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
        options: &RequestOptions,
    ) -> Result<RawResponse, StructuredError> {
        let url = self.build_url(path, &options.query)?;

        let mut request = self.client.request(method.clone(), url.clone());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(metadata) = &options.metadata {
            request = request.header(METADATA_HEADER, metadata.to_base64());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let trace_id = Uuid::new_v4().to_string();

        let response = request.send().await.map_err(|err| {
            error!(%method, %url, %trace_id, error = %err, "failed to send HTTP request");
            http_error(421, ERROR_SEND_HTTP_REQUEST_FAILED, None)
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|err| {
            error!(%method, %url, %trace_id, status, error = %err, "failed to read response body");
            http_error(421, ERROR_READ_RESPONSE_BODY_FAILED, None)
        })?;

        debug!(
            %method,
            %url,
            %trace_id,
            response_http_code = status,
            response_size = body.len(),
            "http exchange completed"
        );

        if status >= 300 {
            let text = String::from_utf8_lossy(&body).into_owned();
            warn!(%method, %url, %trace_id, status, body = %text, "HTTP response code is error");
            return Err(http_error(
                status,
                ERROR_RESPONSE_CODE_IS_ERROR,
                Some(Metadata::from_iter([(RESPONSE_BODY_KEY, text)])),
            ));
        }

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
            trace_id,
        })
    }

    fn build_url(&self, path: &str, query: &BTreeMap<String, String>) -> Result<Url, StructuredError> {
        let raw = format!("{}{}", self.root_url, path);
        let mut url = Url::parse(&raw).map_err(|err| {
            error!(url = %raw, error = %err, "invalid request URL");
            http_error(421, ERROR_SEND_HTTP_REQUEST_FAILED, Some(Metadata::from_iter([("url", raw.as_str())])))
        })?;

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        Ok(url)
    }
}

fn http_error(code: u16, sub_domain_code: &str, meta: Option<Metadata>) -> StructuredError {
    StructuredError::new(code, ERROR_DOMAIN, ERROR_SUB_DOMAIN, sub_domain_code, meta)
}

/// Extracts the remote body from a `response_code_is_error` failure.
///
/// Returns the lower-cased body (handy for matching remote messages) and the
/// audit fields to attach to a fail record. `None` for any other error.
pub fn unwrap_response_code_is_error(err: &StructuredError) -> Option<(String, AuditFields)> {
    if err.sub_domain_code() != ERROR_RESPONSE_CODE_IS_ERROR {
        return None;
    }

    let meta = err.meta();
    let body = meta.get(RESPONSE_BODY_KEY);

    let mut fields = AuditFields::new();
    fields.insert(RESPONSE_BODY_KEY.to_string(), json!(body));

    Some((body.to_lowercase(), fields))
}
