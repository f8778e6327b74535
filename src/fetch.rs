//! HTTP transport used by the external adaptor.
//!
//! The adaptor only needs "GET this URL with these headers, within this
//! timeout", so the transport sits behind [`HttpFetcher`]. Production code
//! uses [`ReqwestFetcher`]; tests script responses.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Status and body of a completed request. Non-2xx responses are still
/// `Ok`; interpreting the status is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

/// [`HttpFetcher`] backed by a shared `reqwest::Client`.
///
/// The connect timeout is fixed at construction; the per-request timeout
/// bounds the whole exchange including the body read. Redirects are
/// followed.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut req_builder = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            req_builder = req_builder.header(*name, *value);
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to GET {}: {}", url, e))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(HttpResponse { status, body })
    }
}
