//! Cross-module flows over a temporary data directory: credential gating,
//! dynamic-venue short-circuits, cooperative cancellation, and the
//! profitability pipeline end-to-end. No network is touched.

use std::sync::Arc;
use std::time::Duration;

use skinarb_backend::arbitrage::{ProfitabilityEngine, ScanParams};
use skinarb_backend::config::{AppConfig, Secrets, Settings};
use skinarb_backend::models::{Listing, ScanMode, Venue, VenueSnapshot};
use skinarb_backend::net::HttpEngine;
use skinarb_backend::orchestrator::{Orchestrator, Selection};
use skinarb_backend::paths::PathRegistry;
use skinarb_backend::proxy::ProxyPoolManager;
use skinarb_backend::scrapers::{build_adapter, CancelFlag, ScraperRunner};
use skinarb_backend::storage::{ArchiveStore, SnapshotStore};
use skinarb_backend::telemetry::{RunStatus, Telemetry};

struct Harness {
    _root: tempfile::TempDir,
    paths: Arc<PathRegistry>,
    config: Arc<AppConfig>,
    store: Arc<SnapshotStore>,
    telemetry: Arc<Telemetry>,
    runner: Arc<ScraperRunner>,
}

fn harness() -> Harness {
    let root = tempfile::tempdir().unwrap();
    let paths = Arc::new(PathRegistry::with_root(root.path()));
    paths.ensure().unwrap();

    let config = Arc::new(AppConfig::with_settings(Settings::default()));
    let secrets = Arc::new(Secrets::from_env());
    let telemetry = Arc::new(Telemetry::new());
    let proxy = Arc::new(ProxyPoolManager::new(
        config.settings.proxy.clone(),
        &secrets,
    ));
    let engine = Arc::new(HttpEngine::new(&config.settings, proxy, telemetry.clone()).unwrap());
    let store = Arc::new(SnapshotStore::new(paths.clone()));
    let runner = Arc::new(ScraperRunner::new(
        engine,
        store.clone(),
        telemetry.clone(),
        secrets,
        CancelFlag::new(),
    ));

    Harness {
        _root: root,
        paths,
        config,
        store,
        telemetry,
        runner,
    }
}

#[tokio::test]
async fn missing_api_key_fails_the_venue_with_zero_network_calls() {
    // The venue requires a key; make sure the environment does not have one.
    std::env::remove_var("WAXPEER_API_KEY");
    let h = harness();

    let orchestrator = Orchestrator::new(
        h.runner.clone(),
        h.config.clone(),
        h.store.clone(),
        h.telemetry.clone(),
    );
    let summary = orchestrator
        .run(Selection::List(vec![Venue::Waxpeer]), Some(2))
        .await;

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.exit_code(), 3);
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("missing API key"));

    // Adapter never reached the HTTP engine.
    assert_eq!(h.telemetry.venue_requests(Venue::Waxpeer), 0);
    // And nothing was written over a (nonexistent) previous snapshot.
    assert!(!h.paths.venue_data_file(Venue::Waxpeer).exists());
}

#[tokio::test]
async fn dynamic_venue_publishes_an_empty_snapshot_with_reason() {
    let h = harness();

    let adapter = build_adapter(Venue::TradeIt, &h.config, &h.store);
    let outcome = h
        .runner
        .run(adapter.as_ref(), h.config.scraper(Venue::TradeIt))
        .await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.items, 0);
    assert_eq!(outcome.error.as_deref(), Some("dynamic content"));
    assert_eq!(h.telemetry.venue_requests(Venue::TradeIt), 0);

    let listings = h.store.load_listings(Venue::TradeIt).unwrap();
    assert!(listings.is_empty());
    assert!(h.paths.venue_data_file(Venue::TradeIt).exists());
}

#[tokio::test]
async fn canceled_run_persists_partial_results_as_valid_json() {
    let h = harness();

    // Cancellation arrives before the first page; the run winds down as
    // partial and whatever validated so far (nothing) is on disk, parseable.
    h.runner.cancel_flag().cancel();
    let adapter = build_adapter(Venue::MannCoStore, &h.config, &h.store);
    let outcome = h
        .runner
        .run(adapter.as_ref(), h.config.scraper(Venue::MannCoStore))
        .await;

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.error.as_deref(), Some("canceled"));
    assert_eq!(h.telemetry.venue_requests(Venue::MannCoStore), 0);

    let raw = std::fs::read(h.paths.venue_data_file(Venue::MannCoStore)).unwrap();
    let listings: Vec<Listing> = serde_json::from_slice(&raw).unwrap();
    assert!(listings.is_empty());
}

#[tokio::test]
async fn profitability_pipeline_over_persisted_snapshots() {
    let h = harness();

    let steam = VenueSnapshot::from_listings(
        Venue::SteamMarket,
        vec![
            Listing::new(Venue::SteamMarket, "AK-47 | Redline (Field-Tested)", 45.50),
            Listing::new(Venue::SteamMarket, "P250 | Sand Dune", 0.03),
        ],
    );
    h.store.write_snapshot(&steam).unwrap();
    let waxpeer = VenueSnapshot::from_listings(
        Venue::Waxpeer,
        vec![
            Listing::new(Venue::Waxpeer, "AK-47 | Redline (Field-Tested)", 37.83),
            Listing::new(Venue::Waxpeer, "P250 | Sand Dune", 0.02),
        ],
    );
    h.store.write_snapshot(&waxpeer).unwrap();

    let archive_store = Arc::new(ArchiveStore::new(h.paths.clone()));
    let engine = ProfitabilityEngine::new(
        h.store.clone(),
        archive_store.clone(),
        None,
        Duration::from_secs(300),
    );

    let mut params = ScanParams::from_settings(&h.config.settings);
    params.mode = ScanMode::Complete;
    params.min_profit_percentage = 0.01;
    params.min_price = 0.50;
    let archive = engine.scan_and_persist(&params).unwrap();

    // Only the Redline clears min_price and the profit threshold.
    assert_eq!(archive.current.total_opportunities, 1);
    let opp = &archive.current.opportunities[0];
    assert_eq!(opp.item_name, "AK-47 | Redline (Field-Tested)");
    assert!(opp.profit_percentage >= 0.01);
    assert!(opp
        .steam_url
        .starts_with("https://steamcommunity.com/market/listings/730/"));

    // Second scan rolls the first into history.
    let archive = engine.scan_and_persist(&params).unwrap();
    assert_eq!(archive.history.len(), 1);
    assert_eq!(archive.last_updated, archive.current.timestamp);

    // The artifact on disk is the canonical shape.
    let raw = std::fs::read(h.paths.profitability_file()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert!(value["current"]["opportunities"].is_array());
    assert_eq!(value["current"]["mode"], "complete");
    assert!(value["history"].as_array().unwrap().len() <= 10);
}
