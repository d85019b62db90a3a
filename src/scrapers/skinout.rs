//! SkinOut market pages.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, PageStyle, VenueAdapter};
use crate::scrapers::de::de_f64;

const ITEMS_URL: &str = "https://skinout.gg/api/market/items?sort=price_asc";

#[derive(Debug, Deserialize)]
struct ItemsPage {
    success: bool,
    #[serde(default)]
    items: Vec<MarketItem>,
}

#[derive(Debug, Deserialize)]
struct MarketItem {
    market_hash_name: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
}

pub struct SkinOutAdapter;

#[async_trait]
impl VenueAdapter for SkinOutAdapter {
    fn venue(&self) -> Venue {
        Venue::SkinOut
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Paginated {
            base_url: ITEMS_URL.to_string(),
            page_param: "page",
            page_size: 50,
            style: PageStyle::PageNumber,
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let page: ItemsPage =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if !page.success {
            return Err(ScrapeError::Parse("skinout success=false".into()));
        }
        Ok(page
            .items
            .into_iter()
            .map(|item| Listing::new(Venue::SkinOut, item.market_hash_name, item.price))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_decodes() {
        let raw = br#"{"success": true, "items": [
            {"market_hash_name": "Five-SeveN | Case Hardened (Battle-Scarred)", "price": "6.40"}
        ]}"#;
        let listings = SkinOutAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 6.40);
    }
}
