//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use registry_index::fetch::{HttpFetcher, HttpResponse};
use serde_json::{json, Value};

type Responder = Box<dyn Fn(usize, &str) -> Result<HttpResponse> + Send + Sync>;

/// Fetcher whose responses are computed from the call number (0-based) and
/// the requested URL. Every request is recorded.
pub struct ScriptedFetcher {
    responder: Responder,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    headers: Mutex<Vec<Vec<(String, String)>>>,
}

impl ScriptedFetcher {
    pub fn new(responder: impl Fn(usize, &str) -> Result<HttpResponse> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        }
    }

    /// A fetcher that fails every request.
    pub fn offline() -> Self {
        Self::new(|_, url| anyhow::bail!("no network in tests: {}", url))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.headers.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn get(&self, url: &str, headers: &[(&str, &str)], _timeout: Duration) -> Result<HttpResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.headers.lock().unwrap().push(
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        (self.responder)(n, url)
    }
}

pub fn ok(body: Value) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
    })
}

/// One listing page with servers named `<prefix>-<n>` for `n` in `range`.
pub fn listing_page(prefix: &str, range: std::ops::Range<usize>, next_cursor: Option<&str>) -> Value {
    let servers: Vec<Value> = range
        .map(|n| {
            json!({
                "server": {
                    "name": format!("{prefix}-{n}"),
                    "version": "1.0.0",
                    "remotes": [{"type": "sse", "url": format!("https://{prefix}.example.com/sse")}]
                },
                "_meta": {
                    "io.modelcontextprotocol.registry/official": {
                        "publishedAt": "2025-09-01T00:00:00Z",
                        "isLatest": true
                    }
                }
            })
        })
        .collect();
    let count = servers.len();
    json!({
        "servers": servers,
        "metadata": {"nextCursor": next_cursor, "count": count}
    })
}
