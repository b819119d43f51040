//! HTTP(S) and IPFS gateway resolver.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::config::ResolverConfig;
use super::content_id::ContentAddress;
use super::{ResolveError, ResolvedSource, SourceResolver};
use crate::metrics;
use crate::net;
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::throttle::RequestThrottle;

/// Resolver backed by reqwest.
pub struct HttpSourceResolver {
    client: Client,
    gateways: Vec<String>,
    max_body_bytes: u64,
    throttle: RequestThrottle,
    retry: RetryPolicy,
}

impl HttpSourceResolver {
    pub fn new(
        config: &ResolverConfig,
        throttle: RequestThrottle,
        retry: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: net::build_client(config.timeout_secs)?,
            gateways: config
                .gateways
                .iter()
                .map(|g| g.trim_end_matches('/').to_string())
                .collect(),
            max_body_bytes: config.max_body_bytes,
            throttle,
            retry,
        })
    }

    /// Try each gateway once, in order. A gateway URL given by the provider is
    /// tried before the configured ones.
    async fn resolve_content_addressed(
        &self,
        uri: &str,
        addr: &ContentAddress,
    ) -> Result<ResolvedSource, ResolveError> {
        let mut urls = Vec::with_capacity(self.gateways.len() + 1);
        if is_http(uri) {
            urls.push(uri.to_string());
        }
        for gateway in &self.gateways {
            let url = addr.gateway_url(gateway);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }

        let mut last_error = "no gateways configured".to_string();
        for url in urls {
            match self.fetch_once(&url, "gateway").await {
                Ok(source) => return Ok(source),
                Err(e) => {
                    debug!(cid = %addr.cid, url = %url, error = %e, "Gateway failed, trying next");
                    last_error = e.to_string();
                }
            }
        }

        warn!(cid = %addr.cid, error = %last_error, "All gateways failed");
        Err(ResolveError::AllGatewaysFailed {
            cid: addr.cid.clone(),
            last_error,
        })
    }

    /// One throttled GET with the body fully read.
    async fn fetch_once(&self, url: &str, kind: &str) -> Result<ResolvedSource, ResolveError> {
        self.throttle.acquire().await;

        let started = Instant::now();
        let result = self.get(url).await;
        metrics::REQUEST_DURATION
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());
        metrics::SOURCE_ATTEMPTS
            .with_label_values(&[kind, if result.is_ok() { "success" } else { "error" }])
            .inc();

        result
    }

    async fn get(&self, url: &str) -> Result<ResolvedSource, ResolveError> {
        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, net::random_user_agent())
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(|e| ResolveError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::RateLimited {
                url: url.to_string(),
                retry_after_ms: net::retry_after_ms(response.headers()),
            });
        }
        if net::is_transient_status(status) {
            return Err(ResolveError::Transient(format!("HTTP {} from {}", status.as_u16(), url)));
        }
        if !status.is_success() {
            return Err(ResolveError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(ResolveError::BodyTooLarge {
                    limit: self.max_body_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResolveError::Transient(e.to_string()))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(ResolveError::BodyTooLarge {
                    limit: self.max_body_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(ResolveError::EmptyBody(url.to_string()));
        }

        Ok(ResolvedSource {
            bytes,
            content_type,
            fetched_from: url.to_string(),
        })
    }
}

fn is_http(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl SourceResolver for HttpSourceResolver {
    async fn resolve(&self, uri: &str) -> Result<ResolvedSource, ResolveError> {
        let uri = uri.trim();
        if let Some(addr) = ContentAddress::parse(uri) {
            return self.resolve_content_addressed(uri, &addr).await;
        }

        if !is_http(uri) {
            return Err(ResolveError::UnsupportedScheme(
                uri.split(':').next().unwrap_or(uri).to_string(),
            ));
        }

        retry_with_policy(&self.retry, "source_fetch", None, || self.fetch_once(uri, "direct")).await
    }
}
