use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::model::{HttpMethod, QueueItem};

/// Delivers one queue item to the backend.
///
/// Any error is treated as a failed attempt. Timeouts are the transport's
/// own business; the processor waits for whatever `send` returns.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, item: &QueueItem) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(base_url: Url, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("courier-sync/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.backend.base_url).context("invalid backend.base_url")?;
        Self::new(
            base_url,
            cfg.backend.auth_token.clone(),
            Duration::from_millis(cfg.backend.timeout_ms),
        )
    }

    pub fn build_request(&self, item: &QueueItem) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(item.endpoint().trim_start_matches('/'))
            .with_context(|| format!("invalid endpoint '{}'", item.endpoint()))?;
        let mut builder = self
            .http
            .request(to_reqwest_method(item.method()), endpoint)
            .header("Idempotency-Key", item.id());
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if item.method() != HttpMethod::Get {
            let body = item
                .payload()
                .to_body()
                .context("failed to encode item payload")?;
            builder = builder.json(&body);
        }
        builder.build().context("failed to build sync request")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(id = item.id()))]
    async fn send(&self, item: &QueueItem) -> Result<()> {
        let request = self.build_request(item)?;
        debug!(method = %request.method(), url = %request.url(), "sending queue item");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach backend")?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        Err(rejection(status, &body))
    }
}

/// Error recorded on the item for a non-2xx response.
fn rejection(status: StatusCode, body: &str) -> anyhow::Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(%status, "rate limited by backend");
        return anyhow!("received 429 from backend: {}", body);
    }
    warn!(%status, body = %body, "backend rejected queue item");
    anyhow!("backend error {}: {}", status, body)
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}
