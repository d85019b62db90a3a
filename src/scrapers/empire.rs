//! CSGOEmpire withdrawal market.
//!
//! Paginated, bearer-authenticated. Prices are denominated in Empire coins
//! (hundredths per item record); the coin→USD ratio is configuration.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, PageStyle, VenueAdapter};

const ITEMS_URL: &str = "https://csgoempire.com/api/v2/trading/items?per_page=160&auction=no";

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    data: Vec<EmpireItem>,
}

#[derive(Debug, Deserialize)]
struct EmpireItem {
    market_name: String,
    /// Coin-hundredths.
    market_value: u64,
}

pub struct EmpireAdapter {
    coin_ratio: f64,
}

impl EmpireAdapter {
    pub fn new(coin_ratio: f64) -> Self {
        Self { coin_ratio }
    }
}

#[async_trait]
impl VenueAdapter for EmpireAdapter {
    fn venue(&self) -> Venue {
        Venue::Empire
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Paginated {
            base_url: ITEMS_URL.to_string(),
            page_param: "page",
            page_size: 160,
            style: PageStyle::PageNumber,
        })
    }

    fn headers(&self, secrets: &Secrets) -> Result<HeaderMap, ScrapeError> {
        let key = secrets
            .api_key(Venue::Empire)
            .ok_or(ScrapeError::MissingApiKey(Venue::Empire))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| ScrapeError::Config("empire key is not header-safe".into()))?,
        );
        Ok(headers)
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let page: ItemsPage =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = page
            .data
            .into_iter()
            .map(|item| {
                let coins = item.market_value as f64 / 100.0;
                let usd = (coins * self.coin_ratio * 100.0).round() / 100.0;
                Listing::new(Venue::Empire, item.market_name, usd)
                    .with_extra("price_coins", serde_json::json!(coins))
            })
            .collect();
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coins_convert_through_the_configured_ratio() {
        let adapter = EmpireAdapter::new(0.614);
        let raw = br#"{"data": [
            {"market_name": "M4A1-S | Printstream (Field-Tested)", "market_value": 14500}
        ]}"#;
        let listings = adapter.parse(raw).unwrap();
        // 145 coins * 0.614 = 89.03 USD
        assert_eq!(listings[0].price, 89.03);
        assert_eq!(
            listings[0].extra.as_ref().unwrap()["price_coins"],
            serde_json::json!(145.0)
        );
    }

    #[test]
    fn bearer_header_requires_key() {
        let adapter = EmpireAdapter::new(0.614);
        assert!(matches!(
            adapter.headers(&Secrets::empty()).unwrap_err(),
            ScrapeError::MissingApiKey(Venue::Empire)
        ));
    }
}
