//! BitSkins market feed.
//!
//! Paginated; the key travels in an `x-apikey` header. Prices are
//! thousandths of a dollar, sometimes serialized as strings.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, PageStyle, VenueAdapter};
use crate::scrapers::de::{de_f64, de_u64_opt};

const MARKET_URL: &str = "https://api.bitskins.com/market/insell/730?limit=500";

#[derive(Debug, Deserialize)]
struct MarketPage {
    #[serde(default)]
    list: Vec<MarketItem>,
}

#[derive(Debug, Deserialize)]
struct MarketItem {
    name: String,
    /// Thousandths of a dollar.
    #[serde(deserialize_with = "de_f64")]
    price_min: f64,
    #[serde(default, deserialize_with = "de_u64_opt")]
    quantity: Option<u64>,
}

pub struct BitskinsAdapter;

#[async_trait]
impl VenueAdapter for BitskinsAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitskins
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Paginated {
            base_url: MARKET_URL.to_string(),
            page_param: "offset",
            page_size: 500,
            style: PageStyle::Offset,
        })
    }

    fn headers(&self, secrets: &Secrets) -> Result<HeaderMap, ScrapeError> {
        let key = secrets
            .api_key(Venue::Bitskins)
            .ok_or(ScrapeError::MissingApiKey(Venue::Bitskins))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-apikey"),
            HeaderValue::from_str(key)
                .map_err(|_| ScrapeError::Config("bitskins key is not header-safe".into()))?,
        );
        Ok(headers)
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let page: MarketPage =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = page
            .list
            .into_iter()
            .map(|item| {
                let mut listing =
                    Listing::new(Venue::Bitskins, item.name, item.price_min / 1000.0);
                if let Some(quantity) = item.quantity {
                    listing = listing.with_quantity(quantity);
                }
                listing
            })
            .collect();
        Ok(listings)
    }
}
