//! skinarb: concurrent skin-market scraping and arbitrage CLI.
//!
//! The process-scoped object graph is assembled here once and threaded
//! explicitly; no module-level singletons.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skinarb_backend::arbitrage::{ProfitabilityEngine, ScanParams};
use skinarb_backend::cache::{ImageCache, KvCache};
use skinarb_backend::config::{AppConfig, Secrets};
use skinarb_backend::models::{ScanMode, Venue};
use skinarb_backend::net::HttpEngine;
use skinarb_backend::orchestrator::{Orchestrator, Selection};
use skinarb_backend::paths::PathRegistry;
use skinarb_backend::proxy::ProxyPoolManager;
use skinarb_backend::scrapers::ScraperRunner;
use skinarb_backend::storage::{ArchiveStore, SnapshotStore};
use skinarb_backend::telemetry::Telemetry;
use skinarb_backend::CancelFlag;

const EXIT_CONFIG: i32 = 2;
const EXIT_FATAL: i32 = 4;

#[derive(Parser)]
#[command(name = "skinarb", about = "Skin marketplace scraper and arbitrage engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the computed adapter concurrency.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the specified adapters once (all enabled venues by default).
    Run {
        /// Venue names or a group (fast, api, essential).
        venues: Vec<String>,
    },
    /// Scan persisted catalogs for arbitrage opportunities.
    Profitability {
        #[arg(long, value_parser = parse_mode, default_value = "complete")]
        mode: ScanMode,
        #[arg(long)]
        min_profit: Option<f64>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max: Option<usize>,
        /// Named preset from search_filters.toml; preset values win.
        #[arg(long)]
        preset: Option<String>,
    },
}

fn parse_mode(raw: &str) -> Result<ScanMode, String> {
    match raw {
        "fast" => Ok(ScanMode::Fast),
        "complete" => Ok(ScanMode::Complete),
        other => Err(format!("unknown mode '{other}', expected fast|complete")),
    }
}

fn parse_selection(venues: &[String]) -> Result<Selection, String> {
    if venues.is_empty() {
        return Ok(Selection::All);
    }
    if venues.len() == 1 && matches!(venues[0].as_str(), "fast" | "api" | "essential") {
        return Ok(Selection::Group(venues[0].clone()));
    }
    let parsed: Result<Vec<Venue>, String> = venues
        .iter()
        .map(|name| Venue::parse(name).ok_or_else(|| format!("unknown venue '{name}'")))
        .collect();
    Ok(Selection::List(parsed?))
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("BOT_LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct App {
    config: Arc<AppConfig>,
    paths: Arc<PathRegistry>,
    proxy: Arc<ProxyPoolManager>,
    engine: Arc<HttpEngine>,
    store: Arc<SnapshotStore>,
    archive: Arc<ArchiveStore>,
    cache: Arc<KvCache>,
    telemetry: Arc<Telemetry>,
    runner: Arc<ScraperRunner>,
}

impl App {
    fn build() -> Result<Self> {
        let paths = Arc::new(PathRegistry::from_env());
        paths.ensure().context("failed to prepare directories")?;

        let config = Arc::new(AppConfig::load(&paths).context("configuration load failed")?);
        let secrets = Arc::new(Secrets::from_env());
        let telemetry = Arc::new(Telemetry::new());

        let proxy = Arc::new(ProxyPoolManager::new(
            config.settings.proxy.clone(),
            &secrets,
        ));
        let engine = Arc::new(
            HttpEngine::new(&config.settings, proxy.clone(), telemetry.clone())
                .context("HTTP engine build failed")?,
        );
        let store = Arc::new(SnapshotStore::new(paths.clone()));
        let archive = Arc::new(ArchiveStore::new(paths.clone()));
        let cache = Arc::new(KvCache::new(config.settings.cache_max_items));

        // Adopt a pre-existing image tree (symlink, never copied).
        let images = ImageCache::new(paths.image_cache_dir());
        if let Ok(tree) = std::env::var("BOT_IMAGE_TREE") {
            if let Err(e) = images.import_tree(std::path::Path::new(&tree)) {
                warn!(error = %e, "image tree import failed");
            }
        }

        let runner = Arc::new(ScraperRunner::new(
            engine.clone(),
            store.clone(),
            telemetry.clone(),
            secrets,
            CancelFlag::new(),
        ));

        Ok(Self {
            config,
            paths,
            proxy,
            engine,
            store,
            archive,
            cache,
            telemetry,
            runner,
        })
    }
}

async fn run_scrape(app: &App, selection: Selection, concurrency: Option<usize>) -> i32 {
    if app.config.settings.use_proxy {
        app.proxy
            .refresh_allow_list_if_needed(app.engine.plain_client())
            .await;
    }

    let orchestrator = Orchestrator::new(
        app.runner.clone(),
        app.config.clone(),
        app.store.clone(),
        app.telemetry.clone(),
    );

    // Ctrl-C flips the shared flag; adapters persist validated pages and
    // wind down on their own.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling in-flight adapters");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run(selection, concurrency).await;

    let stats = app.proxy.stats();
    if !stats.pools.is_empty() {
        for pool in &stats.pools {
            info!(
                pool = %pool.name,
                score = format!("{:.2}", pool.score),
                success = pool.success,
                failure = pool.failure,
                "pool health"
            );
        }
    }
    let cache_stats = app.cache.stats();
    info!(
        entries = cache_stats.entries,
        hits = cache_stats.hits,
        misses = cache_stats.misses,
        "cache stats"
    );

    summary.exit_code()
}

fn run_profitability(
    app: &App,
    mode: ScanMode,
    min_profit: Option<f64>,
    min_price: Option<f64>,
    max: Option<usize>,
    preset: Option<String>,
) -> i32 {
    let cache = app
        .config
        .settings
        .cache_enabled
        .then(|| app.cache.clone());
    let engine = ProfitabilityEngine::new(
        app.store.clone(),
        app.archive.clone(),
        cache,
        Duration::from_secs(app.config.settings.cache_ttl_secs),
    );

    let mut params = ScanParams::from_settings(&app.config.settings);
    params.mode = mode;
    if let Some(v) = min_profit {
        params.min_profit_percentage = v;
    }
    if let Some(v) = min_price {
        params.min_price = v;
    }
    if let Some(v) = max {
        params.max_results = v;
    }
    if let Some(name) = preset {
        match app.config.filter_preset(&name) {
            Some(filters) => params = params.apply_preset(filters),
            None => {
                error!(preset = %name, "unknown search filter preset");
                return EXIT_CONFIG;
            }
        }
    }

    match engine.scan_and_persist(&params) {
        Ok(archive) => {
            info!(
                found = archive.current.total_opportunities,
                mode = %archive.current.mode,
                file = %app.paths.profitability_file().display(),
                "opportunities persisted"
            );
            for opp in archive.current.opportunities.iter().take(10) {
                info!(
                    item = %opp.item_name,
                    venue = %opp.buy_venue,
                    buy = format!("{:.2}", opp.buy_price),
                    net = format!("{:.2}", opp.net_steam_price),
                    profit_pct = format!("{:.1}%", opp.profit_percentage * 100.0),
                    "opportunity"
                );
            }
            0
        }
        Err(e) => {
            error!(error = %e, "profitability scan failed");
            EXIT_FATAL
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing("info");

    let app = match App::build() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("startup failed: {e:#}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let code = match cli.command {
        Command::Run { venues } => match parse_selection(&venues) {
            Ok(selection) => run_scrape(&app, selection, cli.concurrency).await,
            Err(e) => {
                eprintln!("{e}");
                EXIT_CONFIG
            }
        },
        Command::Profitability {
            mode,
            min_profit,
            min_price,
            max,
            preset,
        } => run_profitability(&app, mode, min_profit, min_price, max, preset),
    };

    std::process::exit(code);
}
