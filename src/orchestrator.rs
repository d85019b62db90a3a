//! Parallel adapter scheduling.
//!
//! Adapters run as spawned tasks under a global semaphore sized from system
//! resources. Starts are staggered so the first burst of requests lands on
//! distinct hosts. A slow adapter is cut off at its wall-clock budget and
//! recorded as a timeout; it never takes the run down with it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::Venue;
use crate::scrapers::{build_adapter, CancelFlag, ScraperRunner};
use crate::storage::SnapshotStore;
use crate::telemetry::{RunOutcome, RunStatus, Telemetry};

const MIN_CONCURRENCY: usize = 2;
const MAX_CONCURRENCY: usize = 16;

/// Delay between adapter starts.
const STAGGER: Duration = Duration::from_millis(150);

/// Which adapters a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Group(String),
    List(Vec<Venue>),
}

impl Selection {
    /// Expand to concrete venues, honoring per-venue enable flags.
    pub fn resolve(&self, config: &AppConfig) -> Vec<Venue> {
        let venues: Vec<Venue> = match self {
            Selection::All => Venue::ALL.to_vec(),
            Selection::List(venues) => venues.clone(),
            Selection::Group(name) => match name.as_str() {
                // Single-response venues that finish in seconds.
                "fast" => vec![
                    Venue::Waxpeer,
                    Venue::Skinport,
                    Venue::CsDeals,
                    Venue::CsTrade,
                    Venue::LisSkins,
                    Venue::MarketCsgo,
                    Venue::White,
                ],
                // Everything with a stable JSON API (no Steam, no SPAs).
                "api" => Venue::ALL
                    .into_iter()
                    .filter(|v| !v.is_steam_origin() && *v != Venue::SteamId)
                    .collect(),
                "essential" => vec![
                    Venue::Waxpeer,
                    Venue::Skinport,
                    Venue::CsDeals,
                    Venue::SteamMarket,
                ],
                other => {
                    warn!(group = other, "unknown venue group, running nothing");
                    Vec::new()
                }
            },
        };
        venues
            .into_iter()
            .filter(|&v| config.scraper(v).enabled)
            .collect()
    }
}

/// Concurrency derived from CPU count and memory headroom, bounded hard.
/// `BOT_CONCURRENCY_FACTOR` scales the result per environment.
pub fn optimal_concurrency() -> usize {
    let mut system = System::new();
    system.refresh_memory();

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let memory_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
    let memory_factor = (memory_gb / 8.0).clamp(0.5, 2.0);
    let env_factor = std::env::var("BOT_CONCURRENCY_FACTOR")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|f| *f > 0.0)
        .unwrap_or(1.0);

    ((cpus as f64 * memory_factor * env_factor) as usize).clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<RunOutcome>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn ok(&self) -> usize {
        self.count(RunStatus::Ok)
    }

    pub fn partial(&self) -> usize {
        self.count(RunStatus::Partial)
    }

    pub fn failed(&self) -> usize {
        self.count(RunStatus::Failed)
    }

    fn count(&self, status: RunStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn total_items(&self) -> usize {
        self.outcomes.iter().map(|o| o.items).sum()
    }

    /// CLI exit code: 0 clean, 3 when some adapters failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed() > 0 {
            3
        } else {
            0
        }
    }
}

pub struct Orchestrator {
    runner: Arc<ScraperRunner>,
    config: Arc<AppConfig>,
    store: Arc<SnapshotStore>,
    telemetry: Arc<Telemetry>,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<ScraperRunner>,
        config: Arc<AppConfig>,
        store: Arc<SnapshotStore>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let cancel = runner.cancel_flag();
        Self {
            runner,
            config,
            store,
            telemetry,
            cancel,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the selected adapters concurrently and wait for all of them.
    pub async fn run(&self, selection: Selection, concurrency: Option<usize>) -> RunSummary {
        let venues = selection.resolve(&self.config);
        let cap = concurrency
            .or(self.config.settings.max_concurrent_scrapers)
            .unwrap_or_else(optimal_concurrency);
        let started = Instant::now();
        info!(adapters = venues.len(), concurrency = cap, "starting scrape run");

        let semaphore = Arc::new(Semaphore::new(cap.max(1)));
        let mut handles = Vec::with_capacity(venues.len());

        for (index, venue) in venues.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let runner = self.runner.clone();
            let config = self.config.clone();
            let store = self.store.clone();
            let cancel = self.cancel.clone();
            let budget = Duration::from_secs(config.settings.scraper_timeout_secs);

            handles.push(tokio::spawn(async move {
                // Stagger so simultaneous starts hit distinct hosts.
                tokio::time::sleep(STAGGER * index as u32).await;
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                if cancel.is_canceled() {
                    return RunOutcome {
                        venue,
                        status: RunStatus::Failed,
                        items: 0,
                        elapsed_ms: 0,
                        error: Some("canceled before start".into()),
                    };
                }
                let adapter = build_adapter(venue, &config, &store);
                let scraper_config = config.scraper(venue);
                match tokio::time::timeout(budget, runner.run(adapter.as_ref(), scraper_config))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(venue = %venue, budget_secs = budget.as_secs(), "adapter exceeded its run budget");
                        RunOutcome {
                            venue,
                            status: RunStatus::Failed,
                            items: 0,
                            elapsed_ms: budget.as_millis() as u64,
                            error: Some("timeout".into()),
                        }
                    }
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "adapter task panicked"),
            }
        }

        let summary = RunSummary {
            outcomes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            ok = summary.ok(),
            partial = summary.partial(),
            failed = summary.failed(),
            items = summary.total_items(),
            elapsed_ms = summary.elapsed_ms,
            "scrape run finished"
        );
        self.telemetry.log_session_report(None);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn concurrency_stays_within_bounds() {
        let n = optimal_concurrency();
        assert!((MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&n));
    }

    #[test]
    fn selection_groups_resolve() {
        let config = AppConfig::with_settings(Settings::default());

        let fast = Selection::Group("fast".into()).resolve(&config);
        assert!(fast.contains(&Venue::Waxpeer));
        assert!(!fast.contains(&Venue::SteamMarket));

        let api = Selection::Group("api".into()).resolve(&config);
        assert!(!api.contains(&Venue::SteamMarket));
        assert!(!api.contains(&Venue::SteamListing));
        assert!(!api.contains(&Venue::SteamId));
        assert!(api.contains(&Venue::Bitskins));

        let essential = Selection::Group("essential".into()).resolve(&config);
        assert!(essential.contains(&Venue::SteamMarket));

        assert!(Selection::Group("nope".into()).resolve(&config).is_empty());
        assert_eq!(Selection::All.resolve(&config).len(), Venue::ALL.len());
    }

    #[test]
    fn disabled_venues_are_filtered_out() {
        let mut config = AppConfig::with_settings(Settings::default());
        config.scraper_mut(Venue::Waxpeer).enabled = false;

        let venues = Selection::List(vec![Venue::Waxpeer, Venue::Skinport]).resolve(&config);
        assert_eq!(venues, vec![Venue::Skinport]);
    }

    #[test]
    fn summary_exit_codes() {
        let outcome = |status| RunOutcome {
            venue: Venue::Waxpeer,
            status,
            items: 0,
            elapsed_ms: 1,
            error: None,
        };
        let clean = RunSummary {
            outcomes: vec![outcome(RunStatus::Ok), outcome(RunStatus::Partial)],
            elapsed_ms: 1,
        };
        assert_eq!(clean.exit_code(), 0);

        let broken = RunSummary {
            outcomes: vec![outcome(RunStatus::Ok), outcome(RunStatus::Failed)],
            elapsed_ms: 1,
        };
        assert_eq!(broken.exit_code(), 3);
    }
}
