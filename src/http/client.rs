//! HTTP client implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::executor::Executor;
use super::request::Request;
use super::response::Response;
use crate::error::ExecutorError;

/// Transport settings for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Upstream proxy URL
    pub proxy: Option<String>,

    /// User agent string
    pub user_agent: String,

    /// Accept invalid TLS certificates
    pub insecure: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            follow_redirects: false,
            proxy: None,
            user_agent: format!("wordrake/{}", env!("CARGO_PKG_VERSION")),
            insecure: true,
        }
    }
}

/// reqwest-backed executor
pub struct HttpClient {
    /// Inner reqwest client
    client: reqwest::Client,

    /// Configured timeout, reported on timeout errors
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let timeout = Duration::from_secs(options.timeout_secs);
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(if options.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .user_agent(&options.user_agent)
            .danger_accept_invalid_certs(options.insecure);

        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .with_context(|| format!("Invalid proxy URL: {}", proxy))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { client, timeout })
    }

    /// Build response from reqwest response
    async fn build_response(
        &self,
        response: reqwest::Response,
        start: Instant,
    ) -> Result<Response, ExecutorError> {
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_string(), v.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Body(e.to_string()))?;

        Ok(Response::new(
            status,
            headers,
            body.to_vec(),
            start.elapsed().as_millis() as u64,
        ))
    }

    fn classify(&self, error: reqwest::Error) -> ExecutorError {
        if error.is_timeout() {
            ExecutorError::Timeout(self.timeout.as_millis() as u64)
        } else if error.is_connect() {
            ExecutorError::Connection(error.to_string())
        } else if error.is_builder() {
            ExecutorError::InvalidRequest(error.to_string())
        } else {
            ExecutorError::Other(error.to_string())
        }
    }
}

#[async_trait]
impl Executor for HttpClient {
    async fn send(&self, request: &Request) -> Result<Response, ExecutorError> {
        let start = Instant::now();

        let method = reqwest::Method::from_str(&request.method)
            .map_err(|_| ExecutorError::InvalidRequest(format!("invalid method {:?}", request.method)))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(val)) => {
                    headers.append(name, val);
                }
                _ => tracing::debug!(header = %key, "Skipping header that is not valid on the wire"),
            }
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        tracing::debug!(
            url = %request.url,
            status = response.status().as_u16(),
            position = request.position,
            "Request completed"
        );

        let response = self.build_response(response, start).await?;
        Ok(response.with_position(request.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new(&HttpOptions::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_method_is_executor_error() {
        let client = HttpClient::new(&HttpOptions::default()).unwrap();
        let request = Request::new("BAD METHOD", "http://127.0.0.1:9/");
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidRequest(_)));
    }

    #[test]
    fn test_rejects_bad_proxy() {
        let options = HttpOptions {
            proxy: Some("::not a url::".into()),
            ..Default::default()
        };
        assert!(HttpClient::new(&options).is_err());
    }
}
