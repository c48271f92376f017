//! HTTP transport for the workflow API.
//!
//! One logical request = up to `max_retries + 1` attempts. Network failures and
//! statuses in `retryable_statuses` are retried after `retry_delay_ms * k`
//! (k = 1..=max_retries); everything else fails on the first attempt.

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::RetryIf;

use crate::error::ApiError;

/// Statuses retried when the config does not say otherwise.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry configuration for a single logical request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delays slept before each retry, in order: `retry_delay_ms * k`.
    pub fn backoff_schedule(&self) -> impl Iterator<Item = Duration> {
        let base = self.retry_delay_ms;
        (1..=self.max_retries as u64).map(move |k| Duration::from_millis(base * k))
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn worst_case_backoff(&self) -> Duration {
        self.backoff_schedule().sum()
    }
}

/// Connection settings for the workflow API.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Typed HTTP client with retry/backoff. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute a request and decode the JSON body as `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let raw = self.execute(method, path, body).await?;
        serde_json::from_str(&raw).map_err(|e| {
            tracing::warn!(path = %path, error = %e, "Response body did not match expected shape");
            ApiError::Decode {
                message: e.to_string(),
            }
        })
    }

    /// Execute a request whose success body is ignored (e.g. DELETE acks).
    pub async fn request_empty<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.execute(method, path, body).await.map(|_| ())
    }

    /// Run the attempt loop and return the raw success body.
    async fn execute<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<String, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let retryable = self.retry.retryable_statuses.as_slice();
        let mut attempt = 0usize;

        let result = RetryIf::spawn(
            self.retry.backoff_schedule(),
            || {
                attempt += 1;
                self.attempt_once(method.clone(), &url, body, attempt)
            },
            |e: &ApiError| {
                let retry = e.is_retryable(retryable);
                if retry {
                    tracing::warn!(
                        method = %method,
                        url = %url,
                        error = %e,
                        "Retryable API failure"
                    );
                }
                retry
            },
        )
        .await;

        if let Err(e) = &result {
            tracing::error!(
                method = %method,
                url = %url,
                kind = e.kind(),
                status = ?e.status(),
                error = %e,
                "API request failed"
            );
        }

        result
    }

    async fn attempt_once<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        attempt: usize,
    ) -> Result<String, ApiError>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!(method = %method, url = %url, attempt, "API request attempt");

        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ApiError::Network {
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::Network {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        id: String,
    }

    fn test_client(server: &MockServer, max_retries: usize, retry_delay_ms: u64) -> ApiClient {
        let retry = RetryPolicy {
            max_retries,
            retry_delay_ms,
            ..RetryPolicy::default()
        };
        ApiClient::new(ApiClientConfig::new(server.uri()).with_retry(retry))
            .expect("Failed to create client")
    }

    #[test]
    fn test_backoff_schedule_is_linear_by_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay_ms: 1000,
            ..RetryPolicy::default()
        };
        let delays: Vec<u64> = policy
            .backoff_schedule()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000]);
        assert_eq!(policy.worst_case_backoff(), Duration::from_millis(6000));
    }

    #[test]
    fn test_no_retry_policy_has_empty_schedule() {
        assert_eq!(RetryPolicy::none().backoff_schedule().count(), 0);
    }

    #[test]
    fn test_default_policy_values() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.retry_delay_ms, 1000);
        assert_eq!(p.retryable_statuses, vec![408, 429, 500, 502, 503, 504]);
    }

    #[tokio::test]
    async fn test_request_decodes_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/things/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, 3, 10);
        let thing: Thing = client
            .request(Method::GET, "/api/things/1", None::<&()>)
            .await
            .expect("request should succeed");
        assert_eq!(thing, Thing { id: "1".to_string() });
    }

    #[tokio::test]
    async fn test_retryable_failures_back_off_linearly_and_stop_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(4)
            .mount(&server)
            .await;

        let client = test_client(&server, 3, 50);
        let start = Instant::now();
        let result: Result<Thing, ApiError> =
            client.request(Method::GET, "/api/things/1", None::<&()>).await;
        let elapsed = start.elapsed();

        assert_eq!(
            result,
            Err(ApiError::Http {
                status: 503,
                body: "overloaded".to_string()
            })
        );
        // 50 + 100 + 150
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_not_found_short_circuits_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such workflow"))
            .mount(&server)
            .await;

        let client = test_client(&server, 3, 1000);
        let start = Instant::now();
        let result: Result<Thing, ApiError> =
            client.request(Method::GET, "/api/things/x", None::<&()>).await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert!(start.elapsed() < Duration::from_millis(1000));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "7"})))
            .mount(&server)
            .await;

        let client = test_client(&server, 3, 10);
        let thing: Thing = client
            .request(Method::GET, "/api/things/7", None::<&()>)
            .await
            .expect("Expected success after retry");
        assert_eq!(thing.id, "7");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "no id"})))
            .mount(&server)
            .await;

        let client = test_client(&server, 3, 10);
        let result: Result<Thing, ApiError> =
            client.request(Method::GET, "/api/things/1", None::<&()>).await;

        assert!(matches!(result, Err(ApiError::Decode { .. })));
        assert_eq!(result.unwrap_err().status(), None);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error_after_all_attempts() {
        // Bind then drop a listener so the port is very likely closed.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let retry = RetryPolicy {
            max_retries: 2,
            retry_delay_ms: 5,
            ..RetryPolicy::default()
        };
        let client = ApiClient::new(
            ApiClientConfig::new(format!("http://{}", addr)).with_retry(retry),
        )
        .unwrap();

        let result: Result<Thing, ApiError> =
            client.request(Method::GET, "/api/things/1", None::<&()>).await;
        match result {
            Err(ApiError::Network { .. }) => {}
            other => panic!("Expected Network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_empty_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/things/1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = test_client(&server, 0, 10);
        client
            .request_empty(Method::DELETE, "/api/things/1", None::<&()>)
            .await
            .expect("delete should succeed");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new(ApiClientConfig::new("http://localhost:8000/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
