//! Skin-market scraping and arbitrage core.
//!
//! Exposes the full component graph for the CLI binary and integration
//! tests: configuration, proxy pools, the HTTP engine, the adapter
//! framework, storage, and the profitability engine.

pub mod arbitrage;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod net;
pub mod orchestrator;
pub mod paths;
pub mod proxy;
pub mod ratelimit;
pub mod scrapers;
pub mod storage;
pub mod telemetry;

pub use arbitrage::{net_sale_price, ProfitabilityEngine, ScanParams};
pub use errors::{NetworkKind, ScrapeError};
pub use models::{Listing, Opportunity, OpportunityArchive, ScanMode, SteamReference, Venue, VenueSnapshot};
pub use orchestrator::{optimal_concurrency, Orchestrator, RunSummary, Selection};
pub use scrapers::{CancelFlag, ScraperRunner};
