//! Profitability scan: join venue catalogs against Steam reference prices,
//! apply the fee schedule, rank and persist opportunities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::arbitrage::fees::net_sale_price;
use crate::cache::KvCache;
use crate::config::{SearchFilters, Settings};
use crate::errors::ScrapeError;
use crate::models::{
    Opportunity, OpportunityArchive, OpportunitySet, ScanMode, SteamReference, Venue,
};
use crate::storage::{ArchiveStore, SnapshotStore};

const STEAM_LISTING_BASE: &str = "https://steamcommunity.com/market/listings/730/";
const REFERENCE_CACHE_KEY: &str = "steam_reference";

/// Effective scan parameters after preset resolution.
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub mode: ScanMode,
    pub min_profit_percentage: f64,
    pub min_price: f64,
    pub max_price: Option<f64>,
    pub max_results: usize,
    pub venues: Option<Vec<Venue>>,
    pub query: Option<String>,
}

impl ScanParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: ScanMode::Complete,
            min_profit_percentage: settings.min_profit_percentage,
            min_price: settings.min_price,
            max_price: None,
            max_results: settings.max_results,
            venues: None,
            query: None,
        }
    }

    /// Layer a named preset on top; preset values win where present.
    pub fn apply_preset(mut self, preset: &SearchFilters) -> Self {
        if let Some(v) = preset.min_profit_percentage {
            self.min_profit_percentage = v;
        }
        if let Some(v) = preset.min_price {
            self.min_price = v;
        }
        if preset.max_price.is_some() {
            self.max_price = preset.max_price;
        }
        if preset.venues.is_some() {
            self.venues = preset.venues.clone();
        }
        if preset.query.is_some() {
            self.query = preset.query.clone();
        }
        self
    }
}

/// Deep link to buy an item on a venue, used when the adapter did not carry
/// a per-listing URL. Names encode spaces as `%20` and pipes as `%7C`.
pub fn venue_search_url(venue: Venue, item_name: &str) -> String {
    let encoded = urlencoding::encode(item_name);
    match venue {
        Venue::Waxpeer => format!("https://waxpeer.com/?game=csgo&sort=ASC&search={encoded}"),
        Venue::Skinport => format!("https://skinport.com/market?search={encoded}"),
        Venue::Bitskins => format!("https://bitskins.com/market/csgo?search={encoded}"),
        Venue::SteamMarket | Venue::SteamListing | Venue::SteamId => {
            format!("{STEAM_LISTING_BASE}{encoded}")
        }
        Venue::Empire => format!("https://csgoempire.com/shop?search={encoded}"),
        Venue::Shadowpay => format!("https://shadowpay.com/csgo-items?search={encoded}"),
        Venue::CsDeals => format!("https://cs.deals/market/csgo?name={encoded}"),
        Venue::CsTrade => format!("https://cs.trade/trade#search={encoded}"),
        Venue::LisSkins => format!("https://lis-skins.com/market/csgo/?query={encoded}"),
        Venue::MarketCsgo => format!("https://market.csgo.com/en/?search={encoded}"),
        Venue::MannCoStore => format!("https://mannco.store/market?game=csgo&search={encoded}"),
        Venue::TradeIt => format!("https://tradeit.gg/csgo/store?search={encoded}"),
        Venue::RapidSkins => format!("https://rapidskins.com/market?query={encoded}"),
        Venue::SkinDeck => format!("https://skindeck.com/listings?query={encoded}"),
        Venue::SkinOut => format!("https://skinout.gg/en/market?search={encoded}"),
        Venue::White => format!("https://white.market/market?search={encoded}"),
    }
}

pub fn steam_listing_url(item_name: &str) -> String {
    format!("{STEAM_LISTING_BASE}{}", urlencoding::encode(item_name))
}

pub struct ProfitabilityEngine {
    snapshots: Arc<SnapshotStore>,
    archive: Arc<ArchiveStore>,
    cache: Option<Arc<KvCache>>,
    cache_ttl: Duration,
}

impl ProfitabilityEngine {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        archive: Arc<ArchiveStore>,
        cache: Option<Arc<KvCache>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            snapshots,
            archive,
            cache,
            cache_ttl,
        }
    }

    /// Union all Steam-origin catalogs, max price per name. The table is
    /// cached for `cache_ttl` between scans.
    pub fn steam_reference(&self) -> Result<SteamReference, ScrapeError> {
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(REFERENCE_CACHE_KEY) {
                if let Ok(map) = serde_json::from_value::<HashMap<String, f64>>(value) {
                    debug!(items = map.len(), "steam reference served from cache");
                    return Ok(SteamReference::from_map(map));
                }
            }
        }

        let mut reference = SteamReference::default();
        for venue in Venue::ALL.iter().filter(|v| v.is_steam_origin()) {
            let listings = self.snapshots.load_listings(*venue)?;
            reference.merge_listings(&listings);
        }

        if let Some(cache) = &self.cache {
            if let Ok(value) = serde_json::to_value(reference.as_map()) {
                cache.set(REFERENCE_CACHE_KEY, value, self.cache_ttl);
            }
        }
        Ok(reference)
    }

    /// Scan every non-Steam catalog for items whose net Steam sale price
    /// clears the buy price by the configured margin.
    pub fn scan(&self, params: &ScanParams) -> Result<OpportunitySet, ScrapeError> {
        let reference = self.steam_reference()?;
        let mut opportunities: Vec<Opportunity> = Vec::new();

        for venue in Venue::ALL {
            if venue.is_steam_origin() || venue == Venue::SteamId {
                continue;
            }
            if let Some(allowed) = &params.venues {
                if !allowed.contains(&venue) {
                    continue;
                }
            }
            let listings = self.snapshots.load_listings(venue)?;
            for listing in listings {
                if listing.price < params.min_price {
                    continue;
                }
                if let Some(max_price) = params.max_price {
                    if listing.price > max_price {
                        continue;
                    }
                }
                if let Some(query) = &params.query {
                    if !listing
                        .item_name
                        .to_lowercase()
                        .contains(&query.to_lowercase())
                    {
                        continue;
                    }
                }
                let Some(steam_gross) = reference.price(&listing.item_name) else {
                    continue;
                };
                let net = match params.mode {
                    ScanMode::Fast => steam_gross,
                    ScanMode::Complete => net_sale_price(steam_gross),
                };
                let profit_absolute = net - listing.price;
                let profit_percentage = profit_absolute / listing.price;
                if profit_percentage < params.min_profit_percentage {
                    continue;
                }

                let buy_url = listing
                    .url
                    .clone()
                    .unwrap_or_else(|| venue_search_url(venue, &listing.item_name));
                opportunities.push(Opportunity {
                    steam_url: steam_listing_url(&listing.item_name),
                    item_name: listing.item_name,
                    buy_venue: venue,
                    buy_price: listing.price,
                    buy_url,
                    steam_price: steam_gross,
                    net_steam_price: net,
                    profit_absolute,
                    profit_percentage,
                    timestamp: Utc::now(),
                });
            }
        }

        // Rank: percentage desc, then absolute profit desc, then name.
        opportunities.sort_by(|a, b| {
            b.profit_percentage
                .partial_cmp(&a.profit_percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.profit_absolute
                        .partial_cmp(&a.profit_absolute)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.item_name.cmp(&b.item_name))
        });
        opportunities.truncate(params.max_results);

        info!(
            mode = %params.mode,
            found = opportunities.len(),
            reference_items = reference.len(),
            "profitability scan complete"
        );

        Ok(OpportunitySet {
            timestamp: Utc::now(),
            total_opportunities: opportunities.len(),
            mode: params.mode,
            opportunities,
        })
    }

    pub fn scan_and_persist(&self, params: &ScanParams) -> Result<OpportunityArchive, ScrapeError> {
        let set = self.scan(params)?;
        self.archive.record(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing;
    use crate::paths::PathRegistry;

    fn fixture() -> (tempfile::TempDir, ProfitabilityEngine, Arc<SnapshotStore>) {
        let root = tempfile::tempdir().unwrap();
        let paths = Arc::new(PathRegistry::with_root(root.path()));
        paths.ensure().unwrap();
        let snapshots = Arc::new(SnapshotStore::new(paths.clone()));
        let archive = Arc::new(ArchiveStore::new(paths));
        let engine = ProfitabilityEngine::new(
            snapshots.clone(),
            archive,
            None,
            Duration::from_secs(300),
        );
        (root, engine, snapshots)
    }

    fn seed(store: &SnapshotStore, venue: Venue, items: &[(&str, f64)]) {
        let listings: Vec<Listing> = items
            .iter()
            .map(|(name, price)| Listing::new(venue, *name, *price))
            .collect();
        let snapshot = crate::models::VenueSnapshot::from_listings(venue, listings);
        store.write_snapshot(&snapshot).unwrap();
    }

    const REDLINE: &str = "AK-47 | Redline (Field-Tested)";

    #[test]
    fn complete_mode_applies_fee_schedule() {
        let (_root, engine, store) = fixture();
        seed(&store, Venue::SteamMarket, &[(REDLINE, 45.50)]);
        seed(&store, Venue::Waxpeer, &[(REDLINE, 37.83)]);
        // A weaker offer on the same name from another venue (~3%).
        seed(&store, Venue::Skinport, &[(REDLINE, 38.50)]);

        let params = ScanParams {
            mode: ScanMode::Complete,
            min_profit_percentage: 0.01,
            min_price: 0.0,
            max_price: None,
            max_results: 50,
            venues: None,
            query: None,
        };
        let set = engine.scan(&params).unwrap();
        assert_eq!(set.total_opportunities, 2);

        let best = &set.opportunities[0];
        assert_eq!(best.buy_venue, Venue::Waxpeer);
        assert!((best.net_steam_price - 39.56).abs() < 0.05);
        assert!((best.profit_absolute - 1.73).abs() < 0.05);
        assert!((best.profit_percentage - 0.046).abs() < 0.002);
        assert!(best.steam_url.starts_with(STEAM_LISTING_BASE));

        // The ~3% skinport offer ranks below.
        assert_eq!(set.opportunities[1].buy_venue, Venue::Skinport);
        assert!(set.opportunities[1].profit_percentage < best.profit_percentage);
    }

    #[test]
    fn fast_mode_skips_fees() {
        let (_root, engine, store) = fixture();
        seed(&store, Venue::SteamMarket, &[("X", 10.00)]);
        seed(&store, Venue::CsDeals, &[("X", 9.00)]);

        let params = ScanParams {
            mode: ScanMode::Fast,
            min_profit_percentage: 0.01,
            min_price: 0.0,
            max_price: None,
            max_results: 10,
            venues: None,
            query: None,
        };
        let set = engine.scan(&params).unwrap();
        let opp = &set.opportunities[0];
        assert_eq!(opp.net_steam_price, 10.00);
        assert!((opp.profit_absolute - 1.00).abs() < 1e-9);
    }

    #[test]
    fn filters_drop_cheap_unknown_and_unprofitable_items() {
        let (_root, engine, store) = fixture();
        seed(&store, Venue::SteamMarket, &[("A", 10.00), ("B", 1.00)]);
        seed(
            &store,
            Venue::Waxpeer,
            &[
                ("A", 9.99),        // ~0% profit in fast mode, below threshold
                ("B", 0.20),        // below min_price
                ("NotOnSteam", 1.0), // no reference
            ],
        );

        let params = ScanParams {
            mode: ScanMode::Fast,
            min_profit_percentage: 0.05,
            min_price: 0.50,
            max_price: None,
            max_results: 10,
            venues: None,
            query: None,
        };
        let set = engine.scan(&params).unwrap();
        assert_eq!(set.total_opportunities, 0);
    }

    #[test]
    fn ranking_breaks_ties_on_absolute_profit_then_name() {
        let (_root, engine, store) = fixture();
        // Both 10% in fast mode; "Big" carries 10x the absolute profit.
        seed(
            &store,
            Venue::SteamMarket,
            &[("Big", 110.0), ("Small", 11.0), ("AAA-Twin", 11.0)],
        );
        seed(
            &store,
            Venue::Shadowpay,
            &[("Big", 100.0), ("Small", 10.0), ("AAA-Twin", 10.0)],
        );

        let params = ScanParams {
            mode: ScanMode::Fast,
            min_profit_percentage: 0.01,
            min_price: 0.0,
            max_price: None,
            max_results: 10,
            venues: None,
            query: None,
        };
        let set = engine.scan(&params).unwrap();
        let names: Vec<&str> = set
            .opportunities
            .iter()
            .map(|o| o.item_name.as_str())
            .collect();
        // Equal pct: absolute profit first, then lexicographic name.
        assert_eq!(names, vec!["Big", "AAA-Twin", "Small"]);
    }

    #[test]
    fn preset_threshold_wins_over_engine_default() {
        let settings = Settings::default();
        let params = ScanParams::from_settings(&settings);
        assert!((params.min_profit_percentage - settings.min_profit_percentage).abs() < 1e-12);

        let preset = SearchFilters {
            min_profit_percentage: Some(0.20),
            min_price: None,
            max_price: Some(50.0),
            venues: None,
            query: Some("Karambit".into()),
        };
        let params = params.apply_preset(&preset);
        assert!((params.min_profit_percentage - 0.20).abs() < 1e-12);
        // Engine default survives where the preset is silent.
        assert!((params.min_price - settings.min_price).abs() < 1e-12);
        assert_eq!(params.max_price, Some(50.0));
        assert_eq!(params.query.as_deref(), Some("Karambit"));
    }

    #[test]
    fn url_encoding_round_trips_every_name() {
        let names = [
            "AK-47 | Redline (Field-Tested)",
            "StatTrak\u{2122} M4A1-S | Hyper Beast (Minimal Wear)",
            "\u{2605} Karambit | Doppler (Factory New)",
            "Sticker | Natus Vincere | Katowice 2014",
        ];
        for name in names {
            let url = steam_listing_url(name);
            assert!(url.starts_with(STEAM_LISTING_BASE));
            let encoded = url.strip_prefix(STEAM_LISTING_BASE).unwrap();
            assert!(!encoded.contains(' '));
            assert!(!encoded.contains('|'));
            assert!(encoded.contains("%20"));
            let decoded = urlencoding::decode(encoded).unwrap();
            assert_eq!(decoded, name);

            // Venue templates encode identically.
            let buy = venue_search_url(Venue::Waxpeer, name);
            let query = buy.rsplit("search=").next().unwrap();
            assert_eq!(urlencoding::decode(query).unwrap(), name);
        }
    }

    #[test]
    fn scan_and_persist_updates_archive() {
        let (_root, engine, store) = fixture();
        seed(&store, Venue::SteamMarket, &[("X", 10.00)]);
        seed(&store, Venue::White, &[("X", 8.00)]);

        let params = ScanParams {
            mode: ScanMode::Fast,
            min_profit_percentage: 0.01,
            min_price: 0.0,
            max_price: None,
            max_results: 10,
            venues: None,
            query: None,
        };
        let archive = engine.scan_and_persist(&params).unwrap();
        assert_eq!(archive.current.total_opportunities, 1);
        assert_eq!(archive.last_updated, archive.current.timestamp);

        let archive = engine.scan_and_persist(&params).unwrap();
        assert_eq!(archive.history.len(), 1);
    }
}
