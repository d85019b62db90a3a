//! Market.CSGO price list (RUB endpoint; ratio from config).

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};
use crate::scrapers::de::{de_f64, de_u64_opt};

const PRICES_URL: &str = "https://market.csgo.com/api/v2/prices/RUB.json";

#[derive(Debug, Deserialize)]
struct PricesResponse {
    success: bool,
    #[serde(default)]
    items: Vec<PriceRow>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    market_hash_name: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    /// Number of active listings for this name.
    #[serde(default, deserialize_with = "de_u64_opt")]
    volume: Option<u64>,
}

pub struct MarketCsgoAdapter {
    currency_ratio: f64,
}

impl MarketCsgoAdapter {
    pub fn new(currency_ratio: f64) -> Self {
        Self { currency_ratio }
    }
}

#[async_trait]
impl VenueAdapter for MarketCsgoAdapter {
    fn venue(&self) -> Venue {
        Venue::MarketCsgo
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: PRICES_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let response: PricesResponse =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if !response.success {
            return Err(ScrapeError::Parse("market.csgo success=false".into()));
        }
        let listings = response
            .items
            .into_iter()
            .map(|row| {
                let usd = (row.price * self.currency_ratio * 100.0).round() / 100.0;
                let mut listing = Listing::new(Venue::MarketCsgo, row.market_hash_name, usd)
                    .with_extra("price_rub", serde_json::json!(row.price));
                if let Some(volume) = row.volume {
                    listing = listing.with_quantity(volume);
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
    fn string_prices_and_volume_decode() {
        let adapter = MarketCsgoAdapter::new(0.011);
        let raw = br#"{"success": true, "items": [
            {"market_hash_name": "M4A4 | Neo-Noir (Field-Tested)", "price": "1240.00", "volume": "5"}
        ]}"#;
        let listings = adapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 13.64);
        assert_eq!(listings[0].quantity, Some(5));
    }
}
