use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::models::proxy::ProxyEndpoint;

/// An opaque fetch request built by a platform adapter.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// External page-fetching capability. Yields the structured page body the
/// adapters extract rows from; DOM mechanics live behind this seam.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &PageRequest,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, AppError>;
}

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// reqwest-backed fetcher with browser-like headers. A client is built per
/// request because the egress proxy changes between pages.
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &PageRequest,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, AppError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout);

        if let Some(proxy) = proxy {
            let egress = reqwest::Proxy::all(proxy.url())
                .map_err(|e| AppError::Fetch(format!("invalid proxy {}: {e}", proxy.key())))?;
            builder = builder.proxy(egress);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::Fetch(format!("failed to build HTTP client: {e}")))?;

        let mut req = client
            .get(&request.url)
            .header("Accept", "application/json,text/html,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9");
        for (name, value) in &request.headers {
            req = req.header(name, value);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Fetch(format!("request to {} failed: {e}", request.url)))?;

        if !resp.status().is_success() {
            return Err(AppError::Fetch(format!(
                "{} returned {}",
                request.url,
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| AppError::Fetch(format!("failed to parse page body: {e}")))
    }
}
