//! Request, adapter and pool telemetry.
//!
//! Registries follow the same shape as the rest of the shared state: RwLock
//! maps plus atomic counters, bounded recent samples for latency. The
//! session report is assembled here and logged once per run.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::models::Venue;

const MAX_RECENT_SAMPLES: usize = 256;

/// Bounded window of recent latency samples, milliseconds.
#[derive(Debug, Default)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
}

impl LatencyWindow {
    pub fn record(&mut self, ms: f64) {
        if self.samples.len() == MAX_RECENT_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    pub fn avg(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().fold(None, |acc, v| {
            Some(match acc {
                Some(m) if m >= v => m,
                _ => v,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Adapter run lifecycle, recorded for visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Parsing,
    Persisting,
    Failed,
}

/// Terminal status of one adapter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub venue: Venue,
    pub status: RunStatus,
    pub items: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct VenueStats {
    requests: u64,
    failures: u64,
    latency: LatencyWindow,
    state: Option<RunState>,
}

#[derive(Debug, Default)]
pub struct Telemetry {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    venues: RwLock<HashMap<Venue, VenueStats>>,
    outcomes: RwLock<Vec<RunOutcome>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, venue: Venue, latency_ms: f64, ok: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut venues = self.venues.write();
        let stats = venues.entry(venue).or_default();
        stats.requests += 1;
        if !ok {
            stats.failures += 1;
        }
        stats.latency.record(latency_ms);
    }

    pub fn set_state(&self, venue: Venue, state: RunState) {
        self.venues.write().entry(venue).or_default().state = Some(state);
    }

    pub fn record_outcome(&self, outcome: RunOutcome) {
        self.outcomes.write().push(outcome);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn venue_requests(&self, venue: Venue) -> u64 {
        self.venues.read().get(&venue).map(|s| s.requests).unwrap_or(0)
    }

    pub fn outcomes(&self) -> Vec<RunOutcome> {
        self.outcomes.read().clone()
    }

    /// Log the end-of-session report: one line per adapter, then totals.
    pub fn log_session_report(&self, pool_report: Option<&str>) {
        let outcomes = self.outcomes.read();
        for outcome in outcomes.iter() {
            let status = match outcome.status {
                RunStatus::Ok => "ok",
                RunStatus::Partial => "partial",
                RunStatus::Failed => "failed",
            };
            match &outcome.error {
                Some(reason) => info!(
                    venue = %outcome.venue,
                    status,
                    items = outcome.items,
                    elapsed_ms = outcome.elapsed_ms,
                    reason = %sanitize(reason),
                    "adapter finished"
                ),
                None => info!(
                    venue = %outcome.venue,
                    status,
                    items = outcome.items,
                    elapsed_ms = outcome.elapsed_ms,
                    "adapter finished"
                ),
            }
        }
        let venues = self.venues.read();
        let mut slowest: Option<(Venue, f64)> = None;
        for (&venue, stats) in venues.iter() {
            if let Some(avg) = stats.latency.avg() {
                if slowest.map(|(_, ms)| avg > ms).unwrap_or(true) {
                    slowest = Some((venue, avg));
                }
            }
        }
        info!(
            requests = self.requests_total(),
            failed = self.requests_failed(),
            adapters = outcomes.len(),
            "session totals"
        );
        if let Some((venue, avg)) = slowest {
            info!(venue = %venue, avg_ms = format!("{avg:.0}"), "slowest venue");
        }
        if let Some(report) = pool_report {
            info!(pools = %report, "proxy pool scores");
        }
    }
}

const SECRET_MARKERS: [&str; 4] = ["api_key", "token", "bearer", "authorization"];

/// Mask a `marker=value` / `marker:value` pair embedded in one token.
fn mask_inline(token: &str) -> Option<String> {
    let lower = token.to_lowercase();
    for marker in SECRET_MARKERS {
        for sep in ['=', ':'] {
            let pattern = format!("{marker}{sep}");
            if let Some(idx) = lower.find(&pattern) {
                let keep = idx + pattern.len();
                if keep < token.len() {
                    return Some(format!("{}***", &token[..keep]));
                }
            }
        }
    }
    None
}

/// Mask credential-looking values before a string reaches the logs.
///
/// Catches `key=value` / `key: value` forms for the usual suspects, plus
/// `Bearer <token>` sequences. Whitespace runs collapse to single spaces.
pub fn sanitize(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut mask_next = false;
    for token in input.split_whitespace() {
        let lower = token.to_lowercase();
        // "Bearer" keeps its own spot and poisons the following token, even
        // when it itself was the value of an authorization header.
        if lower == "bearer" {
            out.push(token.to_string());
            mask_next = true;
            continue;
        }
        if mask_next {
            out.push("***".to_string());
            mask_next = false;
            continue;
        }
        if let Some(masked) = mask_inline(token) {
            out.push(masked);
            continue;
        }
        // `authorization:` / `token=` with the value in the next token.
        let bare = lower.trim_end_matches([':', '=']);
        if bare.len() < lower.len() && SECRET_MARKERS.contains(&bare) {
            out.push(token.to_string());
            mask_next = true;
            continue;
        }
        out.push(token.to_string());
    }
    out.join(" ")
}
