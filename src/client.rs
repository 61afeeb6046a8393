//! HTTP client for the system under test.
//!
//! The [`ApiClient`] is the one component of the world that is *not*
//! rollbackable: it issues real, mutating requests against the API being
//! explored. It is a thin wrapper over `reqwest` that pins a base URL,
//! default headers and a per-request timeout, and normalizes every response
//! into an [`ApiResponse`] whose body is parsed JSON (non-JSON bodies are
//! carried as a string value).

use std::time::{Duration, Instant};

use miette::Diagnostic;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while building the client or issuing requests.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// The configured base URL or a joined path is not a valid URL.
    #[error("invalid request URL: {url}")]
    #[diagnostic(
        code(roamgraph::client::url),
        help("Base URLs must be absolute, e.g. `http://localhost:8080`.")
    )]
    InvalidUrl { url: String },

    /// A default header name or value was malformed.
    #[error("invalid default header `{name}`")]
    #[diagnostic(code(roamgraph::client::header))]
    InvalidHeader { name: String },

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    #[diagnostic(code(roamgraph::client::build))]
    Build { message: String },

    /// Transport-level failure (connect, timeout, TLS).
    #[error("request to {url} failed: {message}")]
    #[diagnostic(code(roamgraph::client::transport))]
    Transport { url: String, message: String },
}

/// A completed HTTP exchange with the system under test.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    status: u16,
    body: Value,
    elapsed: Duration,
}

impl ApiResponse {
    /// Build a response that did not come off the wire.
    ///
    /// Useful for action handlers that drive a test double instead of the
    /// real API, and for compile-to-core frontends replaying recorded
    /// exchanges.
    #[must_use]
    pub fn synthetic(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            elapsed: Duration::ZERO,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Parsed response body. Non-JSON bodies appear as a JSON string;
    /// empty bodies as `null`.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Wall-clock time the exchange took.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Extract a body field by JSON pointer (`/id`, `/data/0/name`).
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.body.pointer(pointer)
    }
}

/// Builder for [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl ApiClientBuilder {
    /// Add a default header sent with every request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a bearer token sent as `Authorization` on every request.
    #[must_use]
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("authorization", value)
    }

    /// Per-request timeout (default 30s).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Finish building the client.
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name_parsed =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| ClientError::InvalidHeader {
                    name: name.clone(),
                })?;
            let value_parsed =
                HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader {
                    name: name.clone(),
                })?;
            headers.insert(name_parsed, value_parsed);
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl {
                url: self.base_url,
            });
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ClientError::Build {
                message: e.to_string(),
            })?;

        Ok(ApiClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// HTTP client bound to the system under test's base URL.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Start building a client for the given base URL.
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build a client with defaults for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder(base_url).build()
    }

    /// The configured base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a `GET` to a path relative to the base URL.
    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, path, None).await
    }

    /// Issue a `POST` with a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.request(Method::POST, path, Some(body.clone())).await
    }

    /// Issue a `PUT` with a JSON body.
    pub async fn put(&self, path: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.request(Method::PUT, path, Some(body.clone())).await
    }

    /// Issue a `PATCH` with a JSON body.
    pub async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.request(Method::PATCH, path, Some(body.clone())).await
    }

    /// Issue a `DELETE`.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Issue an arbitrary request against a path relative to the base URL.
    ///
    /// HTTP error statuses are *not* errors here: the explorer treats a 404
    /// or 500 as an observable outcome, so only transport failures surface
    /// as `Err`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ClientError> {
        let url = self.join(path);
        let started = Instant::now();

        let mut req = self.http.request(method, &url);
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| ClientError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| ClientError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let elapsed = started.elapsed();

        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status,
            body,
            elapsed,
        })
    }

    fn join(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_must_be_absolute() {
        let err = ApiClient::new("localhost:8080").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let client = ApiClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.join("/orders"), "http://localhost:8080/orders");
        assert_eq!(client.join("orders"), "http://localhost:8080/orders");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let err = ApiClient::builder("http://localhost")
            .header("bad\nname", "v")
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidHeader { .. }));
    }
}
