//! ShadowPay price list.
//!
//! Token-authenticated single call. `count` is a stock figure whose
//! semantics differ per endpoint, so it stays in `extra` as
//! `quantity_raw` rather than populating the top-level quantity.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};
use crate::scrapers::de::{de_f64, de_u64_opt};

const PRICES_URL: &str = "https://api.shadowpay.com/api/v2/user/items/prices?project=csgo&currency=USD";

#[derive(Debug, Deserialize)]
struct PricesResponse {
    status: String,
    #[serde(default)]
    data: Vec<PriceRow>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    steam_market_hash_name: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(default, deserialize_with = "de_u64_opt")]
    count: Option<u64>,
}

pub struct ShadowpayAdapter;

#[async_trait]
impl VenueAdapter for ShadowpayAdapter {
    fn venue(&self) -> Venue {
        Venue::Shadowpay
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: PRICES_URL.to_string(),
        })
    }

    fn headers(&self, secrets: &Secrets) -> Result<HeaderMap, ScrapeError> {
        let key = secrets
            .api_key(Venue::Shadowpay)
            .ok_or(ScrapeError::MissingApiKey(Venue::Shadowpay))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("token"),
            HeaderValue::from_str(key)
                .map_err(|_| ScrapeError::Config("shadowpay key is not header-safe".into()))?,
        );
        Ok(headers)
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let response: PricesResponse =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if response.status != "success" {
            return Err(ScrapeError::Parse(format!(
                "shadowpay status={}",
                response.status
            )));
        }
        let listings = response
            .data
            .into_iter()
            .map(|row| {
                let mut listing =
                    Listing::new(Venue::Shadowpay, row.steam_market_hash_name, row.price);
                if let Some(count) = row.count {
                    listing = listing.with_extra("quantity_raw", serde_json::json!(count));
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
    fn stock_count_stays_in_extra() {
        let raw = br#"{"status": "success", "data": [
            {"steam_market_hash_name": "Desert Eagle | Printstream (Field-Tested)", "price": "44.10", "count": 9}
        ]}"#;
        let listings = ShadowpayAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 44.10);
        assert_eq!(listings[0].quantity, None);
        assert_eq!(
            listings[0].extra.as_ref().unwrap()["quantity_raw"],
            serde_json::json!(9)
        );
    }

    #[test]
    fn non_success_status_is_a_parse_error() {
        assert!(ShadowpayAdapter
            .parse(br#"{"status": "error", "data": []}"#)
            .is_err());
    }
}
