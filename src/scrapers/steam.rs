//! Steam Community Market adapters.
//!
//! Three feeds share the global Steam request cap:
//! - `steam_market`: paginated `search/render` catalog, cents → USD.
//! - `steam_listing`: per-item `itemordershistogram` queries keyed by
//!   nameid, for the names the search endpoint lags on.
//! - `steamid`: harvests `item_name → nameid` pairs out of listing pages;
//!   the resulting table feeds `steam_listing`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, NameidTask, PageStyle, VenueAdapter};
use crate::storage::SnapshotStore;

const SEARCH_RENDER_URL: &str =
    "https://steamcommunity.com/market/search/render/?appid=730&norender=1&count=100";
const HISTOGRAM_URL: &str = "https://steamcommunity.com/market/itemordershistogram?country=US&language=english&currency=1&two_factor=0";
const LISTING_PAGE_BASE: &str = "https://steamcommunity.com/market/listings/730/";

const NAMEID_BATCH: usize = 25;

#[derive(Debug, Deserialize)]
struct SearchRender {
    success: bool,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    hash_name: String,
    /// Lowest listed price in cents.
    sell_price: u64,
    #[serde(default)]
    sell_listings: Option<u64>,
    #[serde(default)]
    asset_description: Option<AssetDescription>,
}

#[derive(Debug, Deserialize)]
struct AssetDescription {
    #[serde(default)]
    icon_url: Option<String>,
}

/// Paginated whole-catalog feed.
pub struct SteamMarketAdapter;

#[async_trait]
impl VenueAdapter for SteamMarketAdapter {
    fn venue(&self) -> Venue {
        Venue::SteamMarket
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Paginated {
            base_url: SEARCH_RENDER_URL.to_string(),
            page_param: "start",
            page_size: 100,
            style: PageStyle::Offset,
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let page: SearchRender =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if !page.success {
            return Err(ScrapeError::Parse("search/render success=false".into()));
        }
        let listings = page
            .results
            .into_iter()
            .map(|item| {
                let mut listing = Listing::new(
                    Venue::SteamMarket,
                    item.hash_name.clone(),
                    item.sell_price as f64 / 100.0,
                )
                .with_url(format!(
                    "{LISTING_PAGE_BASE}{}",
                    urlencoding::encode(&item.hash_name)
                ));
                if let Some(count) = item.sell_listings {
                    listing = listing.with_quantity(count);
                }
                if let Some(icon) = item.asset_description.and_then(|a| a.icon_url) {
                    listing = listing.with_extra("image", serde_json::Value::String(icon));
                }
                listing
            })
            .collect();
        Ok(listings)
    }
}

#[derive(Debug, Deserialize)]
struct Histogram {
    success: u8,
    #[serde(default)]
    lowest_sell_order: Option<String>,
    #[serde(default)]
    highest_buy_order: Option<String>,
}

/// Per-nameid order book queries for names missing from the search feed.
pub struct SteamListingAdapter {
    store: Arc<SnapshotStore>,
}

impl SteamListingAdapter {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VenueAdapter for SteamListingAdapter {
    fn venue(&self) -> Venue {
        Venue::SteamListing
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        // The nameid table is itself a venue snapshot, maintained by the
        // `steamid` adapter.
        let table = self.store.load_listings(Venue::SteamId)?;
        let items = table
            .iter()
            .filter_map(|entry| {
                let nameid = entry
                    .extra
                    .as_ref()
                    .and_then(|extra| extra.get("nameid"))
                    .and_then(|v| v.as_u64())?;
                Some(NameidTask {
                    item_name: entry.item_name.clone(),
                    nameid,
                })
            })
            .collect();
        Ok(FetchPlan::NameidBatch {
            items,
            batch_size: NAMEID_BATCH,
        })
    }

    fn parse(&self, _raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        Err(ScrapeError::Parse(
            "steam_listing only decodes nameid responses".into(),
        ))
    }

    fn nameid_request(&self, task: &NameidTask) -> Option<String> {
        (task.nameid > 0).then(|| format!("{HISTOGRAM_URL}&item_nameid={}", task.nameid))
    }

    fn parse_nameid(
        &self,
        task: &NameidTask,
        raw: &[u8],
    ) -> Result<Option<Listing>, ScrapeError> {
        let histogram: Histogram =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if histogram.success != 1 {
            return Ok(None);
        }
        // Histogram prices come back as cent strings.
        let Some(cents) = histogram
            .lowest_sell_order
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            return Ok(None);
        };
        let mut listing = Listing::new(
            Venue::SteamListing,
            task.item_name.clone(),
            cents as f64 / 100.0,
        )
        .with_url(format!(
            "{LISTING_PAGE_BASE}{}",
            urlencoding::encode(&task.item_name)
        ));
        if let Some(buy) = histogram
            .highest_buy_order
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
        {
            listing = listing.with_extra(
                "highest_buy_order",
                serde_json::json!(buy as f64 / 100.0),
            );
        }
        Ok(Some(listing))
    }
}

/// Harvests nameids out of listing pages for names the table lacks.
///
/// Listing pages embed `Market_LoadOrderSpread( <nameid> )`; the extracted
/// id is persisted as a `steamid` snapshot entry with the id in `extra`.
pub struct SteamIdAdapter {
    store: Arc<SnapshotStore>,
}

impl SteamIdAdapter {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

pub(crate) fn extract_nameid(html: &str) -> Option<u64> {
    let marker = "Market_LoadOrderSpread(";
    let at = html.find(marker)? + marker.len();
    let digits: String = html[at..]
        .chars()
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl VenueAdapter for SteamIdAdapter {
    fn venue(&self) -> Venue {
        Venue::SteamId
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        let known: std::collections::HashSet<String> = self
            .store
            .load_listings(Venue::SteamId)?
            .into_iter()
            .map(|l| l.item_name)
            .collect();
        let items = self
            .store
            .load_listings(Venue::SteamMarket)?
            .into_iter()
            .filter(|l| !known.contains(&l.item_name))
            .map(|l| NameidTask {
                item_name: l.item_name,
                nameid: 0,
            })
            .collect();
        Ok(FetchPlan::NameidBatch {
            items,
            batch_size: NAMEID_BATCH,
        })
    }

    fn parse(&self, _raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        Err(ScrapeError::Parse(
            "steamid only decodes nameid responses".into(),
        ))
    }

    fn nameid_request(&self, task: &NameidTask) -> Option<String> {
        Some(format!(
            "{LISTING_PAGE_BASE}{}",
            urlencoding::encode(&task.item_name)
        ))
    }

    fn parse_nameid(
        &self,
        task: &NameidTask,
        raw: &[u8],
    ) -> Result<Option<Listing>, ScrapeError> {
        let html = String::from_utf8_lossy(raw);
        let Some(nameid) = extract_nameid(&html) else {
            return Ok(None);
        };
        Ok(Some(
            Listing::new(Venue::SteamId, task.item_name.clone(), 0.0)
                .with_extra("nameid", serde_json::json!(nameid)),
        ))
    }
}
