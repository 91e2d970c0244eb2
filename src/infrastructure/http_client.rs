//! Product page fetching through the shared proxy pool
//!
//! Every fetch leases a proxy for its whole duration, sends a randomly chosen
//! browser user agent and treats any non-2xx status as a failure. An optional
//! per-fetch timeout and an optional global requests-per-second limit apply.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::USER_AGENT;
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::domain::EnrichError;
use crate::infrastructure::proxy_pool::ProxyPool;
use crate::infrastructure::user_agents::random_user_agent;

/// Source of product page bodies
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String, EnrichError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetcherConfig {
    pub timeout: Option<Duration>,
    pub requests_per_second: Option<u32>,
}

pub struct PageFetcher {
    proxies: Arc<ProxyPool>,
    // one client per proxy address, built on first use
    clients: Mutex<HashMap<String, Client>>,
    timeout: Option<Duration>,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl PageFetcher {
    #[must_use]
    pub fn new(proxies: Arc<ProxyPool>, config: FetcherConfig) -> Self {
        let rate_limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            proxies,
            clients: Mutex::new(HashMap::new()),
            timeout: config.timeout,
            rate_limiter,
        }
    }

    fn client_for(&self, proxy: &str) -> Result<Client, EnrichError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .proxy(Proxy::all(proxy).map_err(|e| EnrichError::Network(format!("Invalid proxy {proxy}: {e}")))?)
            .build()
            .map_err(|e| EnrichError::Network(format!("Failed to create HTTP client: {e}")))?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    async fn get_text(client: &Client, url: &str) -> Result<String, EnrichError> {
        let response = client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| EnrichError::Network(format!("Failed to fetch {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Status(status.as_u16(), url.to_string()));
        }

        response
            .text()
            .await
            .map_err(|e| EnrichError::Network(format!("Failed to read response body from {url}: {e}")))
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, EnrichError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let lease = self
            .proxies
            .acquire()
            .await
            .map_err(|e| EnrichError::Network(e.to_string()))?;
        let client = self.client_for(lease.address())?;
        debug!(url, proxy = lease.address(), "Fetching product page");

        let body = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, Self::get_text(&client, url))
                .await
                .map_err(|_| EnrichError::Timeout(url.to_string()))?,
            None => Self::get_text(&client, url).await,
        }?;

        debug!(url, bytes = body.len(), "Fetched product page");
        drop(lease);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;

    /// Local server standing in for a forward proxy: plain-HTTP requests
    /// arrive in absolute form and are routed by path.
    async fn spawn_proxy() -> String {
        let app = Router::new()
            .route(
                "/product",
                get(|headers: HeaderMap| async move {
                    headers
                        .get(USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn fetches_through_a_leased_proxy_with_browser_user_agent() {
        let pool = ProxyPool::new(vec![spawn_proxy().await]);
        let fetcher = PageFetcher::new(pool.clone(), FetcherConfig::default());

        let body = fetcher.fetch("http://shop.invalid/product").await.unwrap();
        assert!(crate::infrastructure::user_agents::USER_AGENTS.contains(&body.as_str()));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let pool = ProxyPool::new(vec![spawn_proxy().await]);
        let fetcher = PageFetcher::new(pool.clone(), FetcherConfig::default());

        let err = fetcher.fetch("http://shop.invalid/missing").await.unwrap_err();
        assert_eq!(err, EnrichError::Status(404, "http://shop.invalid/missing".into()));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn timeout_is_a_failure_and_returns_the_proxy() {
        let pool = ProxyPool::new(vec![spawn_proxy().await]);
        let fetcher = PageFetcher::new(
            pool.clone(),
            FetcherConfig {
                timeout: Some(Duration::from_millis(100)),
                requests_per_second: Some(50),
            },
        );

        let err = fetcher.fetch("http://shop.invalid/slow").await.unwrap_err();
        assert!(matches!(err, EnrichError::Timeout(_)));
        assert_eq!(pool.available(), 1);
    }
}
