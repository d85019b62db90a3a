//! Rotating proxy pools with health scoring and allow-list sync.
//!
//! Pools rotate round-robin; across pools the best-scoring non-empty pool
//! wins. Counters are updated under one short lock per call. The upstream
//! vendor only honors requests from allow-listed egress IPs, so the manager
//! re-detects the public IP lazily and pushes an update when it moved.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ProxySettings, Secrets};

/// Consecutive failures after which a pool is considered degraded and its
/// cursor skips past the failing endpoint burst.
const DEGRADED_THRESHOLD: u32 = 5;

const MAX_LATENCY_SAMPLES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub pool: String,
    pub url: String,
}

#[derive(Debug)]
struct PoolState {
    name: String,
    endpoints: Vec<String>,
    cursor: usize,
    success: u64,
    failure: u64,
    consecutive_errors: u32,
    latencies_ms: VecDeque<f64>,
    region: Option<String>,
}

impl PoolState {
    fn new(name: String, endpoints: Vec<String>, region: Option<String>) -> Self {
        Self {
            name,
            endpoints,
            cursor: 0,
            success: 0,
            failure: 0,
            consecutive_errors: 0,
            latencies_ms: VecDeque::new(),
            region,
        }
    }

    fn active(&self) -> bool {
        !self.endpoints.is_empty()
    }

    fn degraded(&self) -> bool {
        self.consecutive_errors >= DEGRADED_THRESHOLD
    }

    fn success_rate(&self) -> f64 {
        let total = self.success + self.failure;
        if total == 0 {
            // Fresh pools rank on size alone.
            1.0
        } else {
            self.success as f64 / total as f64
        }
    }

    /// Ranking score: `success_rate × proxy_count − consecutive_errors × 5`.
    fn score(&self) -> f64 {
        self.success_rate() * self.endpoints.len() as f64 - self.consecutive_errors as f64 * 5.0
    }

    fn next_endpoint(&mut self) -> Option<String> {
        if self.endpoints.is_empty() {
            return None;
        }
        let endpoint = self.endpoints[self.cursor % self.endpoints.len()].clone();
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        Some(endpoint)
    }

    fn avg_latency_ms(&self) -> Option<f64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        Some(self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub name: String,
    pub proxies: usize,
    pub success: u64,
    pub failure: u64,
    pub consecutive_errors: u32,
    pub score: f64,
    pub degraded: bool,
    pub avg_latency_ms: Option<f64>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pools: Vec<PoolReport>,
    pub current_ip: Option<String>,
}

pub struct ProxyPoolManager {
    pools: Mutex<Vec<PoolState>>,
    current_ip: Mutex<Option<String>>,
    settings: ProxySettings,
    oculus_auth_token: Option<String>,
    oculus_order_token: Option<String>,
}

impl ProxyPoolManager {
    pub fn new(settings: ProxySettings, secrets: &Secrets) -> Self {
        let pools = settings
            .pools
            .iter()
            .map(|seed| {
                PoolState::new(seed.name.clone(), seed.endpoints.clone(), seed.region.clone())
            })
            .collect();
        Self {
            pools: Mutex::new(pools),
            current_ip: Mutex::new(None),
            oculus_auth_token: secrets.oculus_auth_token().map(str::to_owned),
            oculus_order_token: secrets.oculus_order_token().map(str::to_owned),
            settings,
        }
    }

    /// Seed or replace a named pool.
    pub fn seed_pool(&self, name: &str, endpoints: Vec<String>) {
        let mut pools = self.pools.lock();
        match pools.iter().position(|p| p.name == name) {
            Some(index) => pools[index].endpoints = endpoints,
            None => pools.push(PoolState::new(name.to_string(), endpoints, None)),
        }
    }

    /// Borrow one endpoint: best-scoring pool with proxies, round-robin
    /// inside it. `None` when every pool is empty; callers may proceed
    /// without a proxy.
    pub fn acquire(&self) -> Option<ProxyEndpoint> {
        let mut pools = self.pools.lock();
        let best = pools
            .iter_mut()
            .filter(|p| p.active())
            .max_by(|a, b| a.score().partial_cmp(&b.score()).expect("scores are finite"))?;
        let url = best.next_endpoint()?;
        Some(ProxyEndpoint {
            pool: best.name.clone(),
            url,
        })
    }

    pub fn record_success(&self, pool_name: &str, latency_ms: f64) {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.iter_mut().find(|p| p.name == pool_name) {
            pool.success += 1;
            pool.consecutive_errors = 0;
            if pool.latencies_ms.len() == MAX_LATENCY_SAMPLES {
                pool.latencies_ms.pop_front();
            }
            pool.latencies_ms.push_back(latency_ms);
        }
    }

    pub fn record_failure(&self, pool_name: &str) {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.iter_mut().find(|p| p.name == pool_name) {
            pool.failure += 1;
            pool.consecutive_errors += 1;
            if pool.consecutive_errors == DEGRADED_THRESHOLD && !pool.endpoints.is_empty() {
                // Skip past the failing burst; the pool stays eligible.
                pool.cursor = (pool.cursor + 1) % pool.endpoints.len();
                warn!(pool = %pool.name, "proxy pool degraded, skipping cursor forward");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let pools = self.pools.lock();
        let reports = pools
            .iter()
            .map(|p| PoolReport {
                name: p.name.clone(),
                proxies: p.endpoints.len(),
                success: p.success,
                failure: p.failure,
                consecutive_errors: p.consecutive_errors,
                score: p.score(),
                degraded: p.degraded(),
                avg_latency_ms: p.avg_latency_ms(),
                region: p.region.clone(),
            })
            .collect();
        PoolStats {
            pools: reports,
            current_ip: self.current_ip.lock().clone(),
        }
    }

    pub fn current_ip(&self) -> Option<String> {
        self.current_ip.lock().clone()
    }

    /// Detect the egress IP and push a vendor allow-list update when it
    /// changed. Never fatal: detection failures fall back to the stored
    /// value, update failures are retried on the next call.
    pub async fn refresh_allow_list_if_needed(&self, client: &reqwest::Client) {
        let detected = match self.detect_public_ip(client).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "public IP detection failed, reusing last known value");
                return;
            }
        };

        let known = self.current_ip.lock().clone();
        if known.as_deref() == Some(detected.as_str()) {
            return;
        }

        match self.push_allow_list(client, &detected).await {
            Ok(()) => {
                info!(ip = %detected, "proxy allow-list updated");
                *self.current_ip.lock() = Some(detected);
            }
            Err(e) => {
                warn!(error = %e, "allow-list update failed, will retry on next request");
            }
        }
    }

    async fn detect_public_ip(&self, client: &reqwest::Client) -> Result<String> {
        let ip = client
            .get(&self.settings.ip_lookup_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("IP lookup request failed")?
            .error_for_status()
            .context("IP lookup returned an error status")?
            .text()
            .await
            .context("IP lookup body unreadable")?;
        let ip = ip.trim().to_string();
        if ip.is_empty() {
            anyhow::bail!("IP lookup returned an empty body");
        }
        debug!(ip = %ip, "egress IP detected");
        Ok(ip)
    }

    async fn push_allow_list(&self, client: &reqwest::Client, ip: &str) -> Result<()> {
        let auth = self
            .oculus_auth_token
            .as_deref()
            .context("OCULUS_AUTH_TOKEN not set")?;
        let order = self
            .oculus_order_token
            .as_deref()
            .context("OCULUS_ORDER_TOKEN not set")?;

        let body = serde_json::json!({
            "orderToken": order,
            "whitelistIp": [ip],
        });
        let response = client
            .post(&self.settings.allowlist_url)
            .header("authToken", auth)
            .json(&body)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .context("allow-list request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("allow-list update returned {}", response.status());
        }
        Ok(())
    }
}
