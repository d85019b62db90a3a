//! Shared HTTP engine.
//!
//! Single typed entry point for outbound requests: browser-like default
//! headers with caller overrides, capped exponential backoff with jitter,
//! proxy borrow-and-refresh on every retry, full-body buffering, and latency
//! telemetry on success and failure. `batch` runs many requests under a
//! concurrency cap while preserving input order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Method, Proxy};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::errors::ScrapeError;
use crate::models::Venue;
use crate::proxy::{ProxyEndpoint, ProxyPoolManager};
use crate::telemetry::Telemetry;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Which underlying client serves a request. `Raw` is the anti-bot path: a
/// bare HTTP/1.1 client with no connection reuse, for venues whose WAF
/// fingerprints modern HTTP library defaults. Both flavors implement the
/// same request contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientFlavor {
    Standard,
    Raw,
}

/// One outbound request as adapters describe it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub venue: Venue,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
    pub use_proxy: bool,
    pub flavor: ClientFlavor,
}

impl HttpRequest {
    pub fn get(venue: Venue, url: impl Into<String>) -> Self {
        Self {
            venue,
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
            use_proxy: true,
            flavor: ClientFlavor::Standard,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer invalid"));
        self.with_header(reqwest::header::AUTHORIZATION, value)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_proxy(mut self) -> Self {
        self.use_proxy = false;
        self
    }

    pub fn with_flavor(mut self, flavor: ClientFlavor) -> Self {
        self.flavor = flavor;
        self
    }
}

/// Capped exponential backoff with xorshift jitter.
#[derive(Debug)]
pub struct BackoffCalculator {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms: base_ms.max(1),
            max_ms: max_ms.max(base_ms.max(1)),
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e3779b9),
        }
    }

    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    /// `min(base * 2^attempt, cap)` with ±30% jitter, floored at `base`.
    pub fn next_backoff(&mut self) -> Duration {
        let exp = (self.base_ms as f64) * 2f64.powi(self.attempt as i32);
        let capped = exp.min(self.max_ms as f64);
        let jitter = (self.next_random() * 2.0 - 1.0) * capped * 0.3;
        let final_ms = (capped + jitter).max(self.base_ms as f64);
        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

pub struct HttpEngine {
    standard: Client,
    raw: Client,
    proxied: Mutex<HashMap<(ClientFlavor, String), Client>>,
    proxy_mgr: Arc<ProxyPoolManager>,
    telemetry: Arc<Telemetry>,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl HttpEngine {
    pub fn new(
        settings: &Settings,
        proxy_mgr: Arc<ProxyPoolManager>,
        telemetry: Arc<Telemetry>,
    ) -> anyhow::Result<Self> {
        let standard = Client::builder()
            .pool_max_idle_per_host(settings.max_connections_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        // Anti-bot path: HTTP/1.1 only, fresh connection per request.
        let raw = Client::builder()
            .http1_only()
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            standard,
            raw,
            proxied: Mutex::new(HashMap::new()),
            proxy_mgr,
            telemetry,
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
            backoff_max_ms: settings.backoff_max_ms,
        })
    }

    /// Plain client for auxiliary lookups (IP detection, allow-list pushes).
    pub fn plain_client(&self) -> &Client {
        &self.standard
    }

    /// Browser-like defaults merged under caller headers. Accept-Encoding is
    /// left to reqwest so gzip/brotli bodies decompress transparently.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }

    fn merged_headers(overrides: &HeaderMap) -> HeaderMap {
        let mut headers = Self::default_headers();
        for (name, value) in overrides {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn client_for(
        &self,
        flavor: ClientFlavor,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Client, ScrapeError> {
        let Some(endpoint) = proxy else {
            return Ok(match flavor {
                ClientFlavor::Standard => self.standard.clone(),
                ClientFlavor::Raw => self.raw.clone(),
            });
        };
        let key = (flavor, endpoint.url.clone());
        if let Some(client) = self.proxied.lock().get(&key) {
            return Ok(client.clone());
        }
        let proxy = Proxy::all(&endpoint.url)
            .map_err(|e| ScrapeError::Config(format!("invalid proxy url: {e}")))?;
        let mut builder = Client::builder().proxy(proxy);
        if flavor == ClientFlavor::Raw {
            builder = builder.http1_only().pool_max_idle_per_host(0);
        } else {
            builder = builder
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60));
        }
        let client = builder
            .build()
            .map_err(|e| ScrapeError::Config(format!("proxy client build failed: {e}")))?;
        self.proxied.lock().insert(key, client.clone());
        Ok(client)
    }

    /// Issue one request with the shared retry policy. The response body is
    /// fully buffered before it is returned.
    pub async fn request(&self, req: &HttpRequest) -> Result<Vec<u8>, ScrapeError> {
        let mut backoff = BackoffCalculator::new(self.backoff_base_ms, self.backoff_max_ms);
        let mut last_err = ScrapeError::Network(crate::errors::NetworkKind::Other);

        for attempt in 0..=self.max_retries {
            // Fresh proxy on every attempt.
            let proxy = if req.use_proxy {
                self.proxy_mgr.acquire()
            } else {
                None
            };
            let client = self.client_for(req.flavor, proxy.as_ref())?;

            let start = Instant::now();
            let outcome = self.execute(&client, req).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(bytes) => {
                    if let Some(endpoint) = &proxy {
                        self.proxy_mgr.record_success(&endpoint.pool, latency_ms);
                    }
                    self.telemetry.record_request(req.venue, latency_ms, true);
                    return Ok(bytes);
                }
                Err(err) => {
                    if let Some(endpoint) = &proxy {
                        self.proxy_mgr.record_failure(&endpoint.pool);
                    }
                    self.telemetry.record_request(req.venue, latency_ms, false);

                    let retryable = err.is_retryable() && attempt < self.max_retries;
                    if !retryable {
                        return Err(err);
                    }
                    let mut delay = backoff.next_backoff();
                    if matches!(err, ScrapeError::RateLimited) {
                        // 429: upstream told us to slow down beyond the bucket.
                        delay *= 2;
                    }
                    warn!(
                        venue = %req.venue,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed, backing off"
                    );
                    last_err = err;
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_err)
    }

    async fn execute(&self, client: &Client, req: &HttpRequest) -> Result<Vec<u8>, ScrapeError> {
        let mut builder = client
            .request(req.method.clone(), &req.url)
            .headers(Self::merged_headers(&req.headers))
            .timeout(req.timeout);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ScrapeError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(venue = %req.venue, status = status.as_u16(), "non-success status");
            return Err(ScrapeError::from_status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::from_transport(&e))?;
        Ok(bytes.to_vec())
    }

    /// Run requests concurrently under `concurrency`, preserving input
    /// order. Failed slots carry their own error; siblings are unaffected.
    pub async fn batch(
        &self,
        requests: Vec<HttpRequest>,
        concurrency: usize,
    ) -> Vec<Result<Vec<u8>, ScrapeError>> {
        stream::iter(requests)
            .map(|req| async move { self.request(&req).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = BackoffCalculator::new(100, 2_000);
        let first = backoff.next_backoff();
        // ±30% jitter around 100ms, floored at base.
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(130));

        for _ in 0..10 {
            let delay = backoff.next_backoff();
            // Never exceeds cap plus jitter.
            assert!(delay <= Duration::from_millis(2_600));
        }
        assert_eq!(backoff.attempt(), 11);
    }

    #[test]
    fn caller_headers_override_defaults() {
        let mut overrides = HeaderMap::new();
        overrides.insert(USER_AGENT, HeaderValue::from_static("custom-agent/1.0"));
        overrides.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("k"),
        );

        let merged = HttpEngine::merged_headers(&overrides);
        assert_eq!(merged.get(USER_AGENT).unwrap(), "custom-agent/1.0");
        assert_eq!(merged.get("x-api-key").unwrap(), "k");
        // Untouched defaults survive.
        assert!(merged.get(ACCEPT).is_some());
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_failures() {
        use crate::config::Settings;
        use crate::proxy::ProxyPoolManager;

        let settings = Settings {
            max_retries: 0,
            ..Settings::default()
        };
        let secrets = crate::config::Secrets::empty();
        let proxy = Arc::new(ProxyPoolManager::new(settings.proxy.clone(), &secrets));
        let telemetry = Arc::new(Telemetry::new());
        let engine = HttpEngine::new(&settings, proxy, telemetry.clone()).unwrap();

        // Unsupported schemes fail in the client without touching the
        // network; each slot carries its own error in input order.
        let requests = vec![
            HttpRequest::get(Venue::Waxpeer, "file:///tmp/a").without_proxy(),
            HttpRequest::get(Venue::Skinport, "file:///tmp/b").without_proxy(),
        ];
        let results = engine.batch(requests, 4).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(telemetry.venue_requests(Venue::Waxpeer), 1);
        assert_eq!(telemetry.venue_requests(Venue::Skinport), 1);
    }

    #[test]
    fn request_builder_composition() {
        let req = HttpRequest::get(Venue::Waxpeer, "https://api.waxpeer.com/v1/prices")
            .with_timeout(Duration::from_secs(60))
            .with_bearer("abc")
            .without_proxy()
            .with_flavor(ClientFlavor::Raw);

        assert_eq!(req.timeout, Duration::from_secs(60));
        assert!(!req.use_proxy);
        assert_eq!(req.flavor, ClientFlavor::Raw);
        assert!(req
            .headers
            .get(reqwest::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("Bearer "));
    }
}
