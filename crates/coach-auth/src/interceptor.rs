//! Authenticated HTTP client with one transparent retry on 401.
//!
//! [`AuthenticatedClient`] attaches the bearer token to every request. When
//! the backend answers 401 for a non-bootstrap path, the client refreshes the
//! token once and reissues the request; the caller only ever sees the final
//! response. Logging out on unrecoverable sessions is the reconciler's job,
//! never this layer's.

use crate::error::RefreshError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// An outgoing backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/students`.
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    /// Set once the request has been reissued after a 401.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A raw backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Failure below HTTP: the request never produced a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

/// Backend API error surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401 that could not be recovered by one refresh-and-retry
    #[error("Unauthorized request to {path}")]
    Unauthorized { path: String },

    /// Any other non-2xx response
    #[error("Request to {path} failed with HTTP {status}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Map a completed response to success or the matching error.
    pub fn check(path: &str, response: ApiResponse) -> Result<ApiResponse, ApiError> {
        match response.status {
            _ if response.is_success() => Ok(response),
            401 => Err(ApiError::Unauthorized {
                path: path.to_string(),
            }),
            status => Err(ApiError::Status {
                path: path.to_string(),
                status,
                body: response.body,
            }),
        }
    }
}

/// Sends a request and returns whatever the server answered.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Supplies bearer tokens to the client.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The token to attach up front, if any.
    async fn current_token(&self) -> Option<String>;

    /// Obtain a fresh token after the server rejected the current one.
    async fn refresh_token(&self) -> Result<String, RefreshError>;
}

/// [`HttpTransport`] over reqwest against the backend base URL.
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    /// Resolve a request path below the base URL, keeping the base path.
    pub fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.endpoint(&request.path)?;
        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

/// Default identity-bootstrap paths exempt from refresh-and-retry.
pub const DEFAULT_BOOTSTRAP_PATHS: [&str; 2] = ["/auth/me", "/auth/login"];

fn normalize_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// HTTP client that makes 401s recoverable exactly once.
pub struct AuthenticatedClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenSource>,
    bootstrap_paths: Vec<String>,
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            transport,
            tokens,
            bootstrap_paths: DEFAULT_BOOTSTRAP_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Replace the set of bootstrap paths.
    pub fn with_bootstrap_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.bootstrap_paths = paths.into_iter().collect();
        self
    }

    pub fn is_bootstrap_path(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.bootstrap_paths
            .iter()
            .any(|p| normalize_path(p) == path)
    }

    /// Send a request, refreshing and retrying once on 401.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.bearer.is_none() {
            request.bearer = self.tokens.current_token().await;
        }

        let response = self.transport.send(&request).await?;
        if response.status != 401 || request.retried || self.is_bootstrap_path(&request.path) {
            return ApiError::check(&request.path, response);
        }

        request.retried = true;
        match self.tokens.refresh_token().await {
            Ok(token) => {
                debug!(path = %request.path, "retrying request with refreshed token");
                request.bearer = Some(token);
                let retried = self.transport.send(&request).await?;
                ApiError::check(&request.path, retried)
            }
            Err(e) => {
                warn!(path = %request.path, error = %e, "token refresh failed, returning 401");
                ApiError::check(&request.path, response)
            }
        }
    }

    /// Send a request and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }
}
