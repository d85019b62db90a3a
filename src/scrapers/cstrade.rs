//! CS.Trade bot inventory.
//!
//! Listed prices include the site's 50% trade bonus; the effective cash
//! price is listed/1.5. Both figures are kept: the original inside
//! `extra`, the effective one as the listing price. The endpoint sits
//! behind a WAF, so this venue runs on the low-level client.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};

const PRICES_URL: &str = "https://cdn.cs.trade:2096/api/prices_CSGO";

/// Listed price → effective price multiplier.
const TRADE_BONUS: f64 = 1.5;

#[derive(Debug, Deserialize)]
struct TradeItem {
    price: f64,
    #[serde(default)]
    have: Option<u64>,
}

pub struct CsTradeAdapter;

#[async_trait]
impl VenueAdapter for CsTradeAdapter {
    fn venue(&self) -> Venue {
        Venue::CsTrade
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: PRICES_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let items: HashMap<String, TradeItem> =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = items
            .into_iter()
            .map(|(name, item)| {
                let effective = (item.price / TRADE_BONUS * 100.0).round() / 100.0;
                let mut listing = Listing::new(Venue::CsTrade, name, effective)
                    .with_extra("price_with_bonus", serde_json::json!(item.price))
                    .with_extra("price_effective", serde_json::json!(effective));
                if let Some(have) = item.have {
                    // On-site stock, not necessarily units for sale.
                    listing = listing.with_extra("quantity_raw", serde_json::json!(have));
                }
                listing
            })
            .collect();
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonus_markup_is_stripped() {
        let raw = br#"{
            "AWP | Wildfire (Minimal Wear)": {"price": 150.00, "have": 2, "max": 5}
        }"#;
        let listings = CsTradeAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 100.00);
        let extra = listings[0].extra.as_ref().unwrap();
        assert_eq!(extra["price_with_bonus"], serde_json::json!(150.0));
        assert_eq!(extra["price_effective"], serde_json::json!(100.0));
        assert_eq!(extra["quantity_raw"], serde_json::json!(2));
        assert_eq!(listings[0].quantity, None);
    }
}
