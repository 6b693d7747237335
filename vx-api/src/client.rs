//! HTTP client for one session on a Matrix home server.
//!
//! Handles bearer authentication, timeouts, bounded retry of gateway errors
//! and the mapping of Matrix error bodies onto [`VxError`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use vx_core::config::PushConfig;
use vx_core::constants::CLIENT_API_PREFIX;
use vx_core::error::{VxError, VxResult};
use vx_models::StoredSession;

use crate::response::MatrixError;

/// Retry configuration for HTTP requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// No in-client retry; failures surface on the first attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// HTTP client bound to one home server and one access token.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    /// Home server base URL without trailing slash.
    base_url: String,
    user_id: String,
    access_token: String,
    timeout: Duration,
    retry_config: RetryConfig,
}

impl ApiClient {
    pub fn new(
        homeserver_url: &str,
        user_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> VxResult<Self> {
        let inner = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| VxError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            base_url: homeserver_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            timeout,
            retry_config: RetryConfig::default(),
        })
    }

    /// Build a client for a stored session.
    pub fn for_session(session: &StoredSession, config: &PushConfig) -> VxResult<Self> {
        Self::new(
            session.base_url(),
            &session.user_id,
            &session.access_token,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_user_id(&self) -> &str {
        &self.user_id
    }

    /// Full URL for a client-server API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{CLIENT_API_PREFIX}{path}", self.base_url)
    }

    fn build_request(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> RequestBuilder {
        let mut builder = self
            .inner
            .request(method, url)
            .timeout(self.timeout)
            .bearer_auth(&self.access_token);
        if let Some(b) = body {
            builder = builder.json(b);
        }
        builder
    }

    /// Execute a request with exponential backoff on gateway errors.
    async fn request_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> VxResult<Response> {
        let url = self.url(path);
        debug!("{} {} ({})", method, path, self.user_id);

        let mut last_error: Option<VxError> = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_retry_delay(attempt - 1);
                warn!(
                    "retrying {} {} (attempt {}/{}) after {:.1}s",
                    method,
                    path,
                    attempt + 1,
                    self.retry_config.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            match self.build_request(method.clone(), &url, body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if self.retry_config.retryable_statuses.contains(&status.as_u16())
                        && attempt < self.retry_config.max_retries
                    {
                        warn!("retryable status {} from {}", status.as_u16(), path);
                        last_error = Some(VxError::ServerError {
                            status: status.as_u16(),
                            errcode: None,
                            message: format!("retryable status {status}"),
                        });
                        continue;
                    }
                    return Self::check_status(response).await;
                }
                Err(e) => {
                    let is_retryable = e.is_timeout() || e.is_connect();
                    let err = Self::classify_error(e);
                    if is_retryable && attempt < self.retry_config.max_retries {
                        warn!("retryable error on {}: {}", path, err);
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| VxError::Http("max retries exceeded".into())))
    }

    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
        let max_ms = self.retry_config.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    // --- Public HTTP methods ---

    pub async fn get(&self, path: &str) -> VxResult<Response> {
        self.request_with_retry(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> VxResult<Response> {
        self.request_with_retry(Method::POST, path, Some(body)).await
    }

    /// Convenience: GET + decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> VxResult<T> {
        let resp = self.get(path).await?;
        Self::parse_response(resp).await
    }

    pub async fn parse_response<T: DeserializeOwned>(response: Response) -> VxResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| VxError::Serialization(format!("failed to parse response: {e}")))
    }

    /// Convert a non-success status into a [`VxError`] using the Matrix error body.
    async fn check_status(response: Response) -> VxResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::status_error(status, &body))
    }

    pub(crate) fn status_error(status: StatusCode, body: &str) -> VxError {
        MatrixError::from_body(body).into_error(status.as_u16())
    }

    /// Classify a reqwest error into a VxError variant.
    fn classify_error(e: reqwest::Error) -> VxError {
        if e.is_timeout() {
            VxError::Timeout(e.to_string())
        } else if e.is_connect() {
            VxError::Http(format!("connection failed: {e}"))
        } else {
            VxError::Http(e.to_string())
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
