use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of integrated marketplaces.
///
/// `steam_market` and `steam_listing` are the two Steam-origin feeds; every
/// other venue is a third-party buy side. `steamid` is the name→nameid
/// harvester backing `steam_listing` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    #[serde(rename = "waxpeer")]
    Waxpeer,
    #[serde(rename = "skinport")]
    Skinport,
    #[serde(rename = "bitskins")]
    Bitskins,
    #[serde(rename = "steam_market")]
    SteamMarket,
    #[serde(rename = "steam_listing")]
    SteamListing,
    #[serde(rename = "empire")]
    Empire,
    #[serde(rename = "shadowpay")]
    Shadowpay,
    #[serde(rename = "csdeals")]
    CsDeals,
    #[serde(rename = "cstrade")]
    CsTrade,
    #[serde(rename = "lisskins")]
    LisSkins,
    #[serde(rename = "marketcsgo")]
    MarketCsgo,
    #[serde(rename = "manncostore")]
    MannCoStore,
    #[serde(rename = "tradeit")]
    TradeIt,
    #[serde(rename = "rapidskins")]
    RapidSkins,
    #[serde(rename = "skindeck")]
    SkinDeck,
    #[serde(rename = "skinout")]
    SkinOut,
    #[serde(rename = "white")]
    White,
    #[serde(rename = "steamid")]
    SteamId,
}

impl Venue {
    pub const ALL: [Venue; 18] = [
        Venue::Waxpeer,
        Venue::Skinport,
        Venue::Bitskins,
        Venue::SteamMarket,
        Venue::SteamListing,
        Venue::Empire,
        Venue::Shadowpay,
        Venue::CsDeals,
        Venue::CsTrade,
        Venue::LisSkins,
        Venue::MarketCsgo,
        Venue::MannCoStore,
        Venue::TradeIt,
        Venue::RapidSkins,
        Venue::SkinDeck,
        Venue::SkinOut,
        Venue::White,
        Venue::SteamId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Waxpeer => "waxpeer",
            Venue::Skinport => "skinport",
            Venue::Bitskins => "bitskins",
            Venue::SteamMarket => "steam_market",
            Venue::SteamListing => "steam_listing",
            Venue::Empire => "empire",
            Venue::Shadowpay => "shadowpay",
            Venue::CsDeals => "csdeals",
            Venue::CsTrade => "cstrade",
            Venue::LisSkins => "lisskins",
            Venue::MarketCsgo => "marketcsgo",
            Venue::MannCoStore => "manncostore",
            Venue::TradeIt => "tradeit",
            Venue::RapidSkins => "rapidskins",
            Venue::SkinDeck => "skindeck",
            Venue::SkinOut => "skinout",
            Venue::White => "white",
            Venue::SteamId => "steamid",
        }
    }

    pub fn parse(s: &str) -> Option<Venue> {
        Venue::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Steam-origin price feeds contribute to the reference table instead of
    /// the buy side.
    pub fn is_steam_origin(&self) -> bool {
        matches!(self, Venue::SteamMarket | Venue::SteamListing)
    }

    /// Environment variable holding this venue's API key.
    pub fn api_key_var(&self) -> String {
        format!("{}_API_KEY", self.as_str().to_uppercase())
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized item listing on a single venue.
///
/// Serialized with the canonical on-disk keys (`Item`, `Price`, `Platform`,
/// `URL`, `Quantity`, `Extra`); prices are USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    #[serde(rename = "Item")]
    pub item_name: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Platform")]
    pub venue: Venue,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "Quantity", default)]
    pub quantity: Option<u64>,
    #[serde(rename = "Extra", default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Listing {
    pub fn new(venue: Venue, item_name: impl Into<String>, price: f64) -> Self {
        Self {
            item_name: item_name.into(),
            price,
            venue,
            url: None,
            quantity: None,
            extra: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value);
        self
    }

    /// A listing is acceptable when the name is non-empty and the price is a
    /// non-negative finite number.
    pub fn is_valid(&self) -> bool {
        !self.item_name.trim().is_empty() && self.price.is_finite() && self.price >= 0.0
    }
}

/// Immutable per-venue catalog produced by one adapter run.
///
/// `(venue, item_name)` is the identity: when a venue reports the same name
/// more than once, the cheapest record survives. Listings are kept sorted by
/// name so on-disk output is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSnapshot {
    pub venue: Venue,
    pub timestamp: DateTime<Utc>,
    pub listings: Vec<Listing>,
}

impl VenueSnapshot {
    pub fn from_listings(venue: Venue, listings: Vec<Listing>) -> Self {
        let mut best: HashMap<String, Listing> = HashMap::with_capacity(listings.len());
        for listing in listings {
            let keep = match best.get(&listing.item_name) {
                Some(existing) => listing.price < existing.price,
                None => true,
            };
            if keep {
                best.insert(listing.item_name.clone(), listing);
            }
        }
        let mut listings: Vec<Listing> = best.into_values().collect();
        listings.sort_by(|a, b| a.item_name.cmp(&b.item_name));
        Self {
            venue,
            timestamp: Utc::now(),
            listings,
        }
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// Steam reference table: `item_name` → gross last-sale price in USD.
///
/// Built by unioning all Steam-origin snapshots; on conflict the maximum
/// price wins (newer listings tend to be higher).
#[derive(Debug, Clone, Default)]
pub struct SteamReference {
    prices: HashMap<String, f64>,
}

impl SteamReference {
    pub fn from_map(prices: HashMap<String, f64>) -> Self {
        Self { prices }
    }

    pub fn as_map(&self) -> &HashMap<String, f64> {
        &self.prices
    }

    pub fn merge_listings<'a>(&mut self, listings: impl IntoIterator<Item = &'a Listing>) {
        for listing in listings {
            let entry = self
                .prices
                .entry(listing.item_name.clone())
                .or_insert(listing.price);
            if listing.price > *entry {
                *entry = listing.price;
            }
        }
    }

    pub fn price(&self, item_name: &str) -> Option<f64> {
        self.prices.get(item_name).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Profitability scan mode. `fast` skips the Steam fee schedule entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Fast,
    Complete,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Fast => f.write_str("fast"),
            ScanMode::Complete => f.write_str("complete"),
        }
    }
}

/// A ranked cross-venue arbitrage candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub item_name: String,
    pub buy_venue: Venue,
    pub buy_price: f64,
    pub buy_url: String,
    pub steam_price: f64,
    pub net_steam_price: f64,
    pub profit_absolute: f64,
    pub profit_percentage: f64,
    pub steam_url: String,
    pub timestamp: DateTime<Utc>,
}

/// One persisted profitability scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunitySet {
    pub timestamp: DateTime<Utc>,
    pub total_opportunities: usize,
    pub mode: ScanMode,
    pub opportunities: Vec<Opportunity>,
}

/// On-disk profitability artifact: the latest scan plus a bounded history of
/// previous scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityArchive {
    pub current: OpportunitySet,
    pub last_updated: DateTime<Utc>,
    pub history: Vec<OpportunitySet>,
}

impl OpportunityArchive {
    pub const MAX_HISTORY: usize = 10;

    pub fn new(current: OpportunitySet) -> Self {
        let last_updated = current.timestamp;
        Self {
            current,
            last_updated,
            history: Vec::new(),
        }
    }

    /// Replace `current` with a new scan, pushing the previous one onto the
    /// ring-buffered history.
    pub fn record(&mut self, next: OpportunitySet) {
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push(previous);
        if self.history.len() > Self::MAX_HISTORY {
            let overflow = self.history.len() - Self::MAX_HISTORY;
            self.history.drain(..overflow);
        }
        self.last_updated = self.current.timestamp;
    }
}
