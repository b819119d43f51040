//! JSON-over-HTTP plumbing shared by the provider adapters.

use std::time::Instant;

use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::ProviderError;
use crate::metrics;
use crate::net;

/// Longest error body kept in `ProviderError::Api`.
const MAX_ERROR_BODY: usize = 512;

pub(crate) struct JsonClient {
    client: Client,
    provider: &'static str,
}

impl JsonClient {
    pub fn new(provider: &'static str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = net::build_client(timeout_secs)
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self { client, provider })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.decorate(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.decorate(self.client.post(url))
    }

    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(USER_AGENT, net::random_user_agent())
            .header(ACCEPT, "application/json")
    }

    /// Send the request and decode the JSON body into `T`.
    ///
    /// Non-JSON responses and bodies that do not match `T` are protocol errors.
    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let started = Instant::now();
        let result = self.send_inner(request).await;
        metrics::REQUEST_DURATION
            .with_label_values(&[self.provider])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn send_inner<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(provider = self.provider, "Rate limit exceeded");
            return Err(ProviderError::RateLimited {
                retry_after_ms: net::retry_after_ms(response.headers()),
            });
        }
        if net::is_transient_status(status) {
            return Err(ProviderError::Transient(format!(
                "{} returned HTTP {}",
                self.provider,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(floor_char_boundary(&message, MAX_ERROR_BODY));
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.contains("json") {
            return Err(ProviderError::Protocol(format!(
                "{} returned content-type '{}'",
                self.provider, content_type
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::Protocol(format!("Unexpected {} response shape: {}", self.provider, e))
        })
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
