//! Skinport public item feed.
//!
//! Unauthenticated, heavily rate-limited (8 req/min) and served
//! brotli-compressed; one call covers the catalog. Prices are USD already.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};

const ITEMS_URL: &str = "https://api.skinport.com/v1/items?app_id=730&currency=USD";

#[derive(Debug, Deserialize)]
struct SkinportItem {
    market_hash_name: String,
    /// Null when nothing is listed right now.
    min_price: Option<f64>,
    #[serde(default)]
    quantity: Option<u64>,
    #[serde(default)]
    item_page: Option<String>,
}

pub struct SkinportAdapter;

#[async_trait]
impl VenueAdapter for SkinportAdapter {
    fn venue(&self) -> Venue {
        Venue::Skinport
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: ITEMS_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let items: Vec<SkinportItem> =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = items
            .into_iter()
            .filter_map(|item| {
                let price = item.min_price?;
                let mut listing = Listing::new(Venue::Skinport, item.market_hash_name, price);
                if let Some(quantity) = item.quantity {
                    listing = listing.with_quantity(quantity);
                }
                if let Some(page) = item.item_page {
                    listing = listing.with_url(page);
                }
                Some(listing)
            })
            .collect();
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_items_are_skipped() {
        let raw = br#"[
            {"market_hash_name": "USP-S | Kill Confirmed (Minimal Wear)", "min_price": 61.2, "quantity": 7,
             "item_page": "https://skinport.com/item/usp-s-kill-confirmed-minimal-wear"},
            {"market_hash_name": "Ghost Item", "min_price": null, "quantity": 0}
        ]"#;
        let listings = SkinportAdapter.parse(raw).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price, 61.2);
        assert_eq!(listings[0].quantity, Some(7));
        assert!(listings[0].url.as_deref().unwrap().contains("skinport.com"));
    }

    #[test]
    fn non_array_payload_is_a_parse_error() {
        assert!(SkinportAdapter.parse(br#"{"error": "rate limited"}"#).is_err());
    }
}
