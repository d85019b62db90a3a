//! Waxpeer price feed.
//!
//! One call returns the whole catalog; prices come back in thousandths of a
//! dollar. The API key rides in the query string, so a missing key fails at
//! plan time with no traffic.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};

#[derive(Debug, Deserialize)]
struct PricesResponse {
    success: bool,
    #[serde(default)]
    items: Vec<PriceItem>,
}

#[derive(Debug, Deserialize)]
struct PriceItem {
    name: String,
    /// Lowest listing, thousandths of a dollar.
    min: u64,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    img: Option<String>,
}

pub struct WaxpeerAdapter;

#[async_trait]
impl VenueAdapter for WaxpeerAdapter {
    fn venue(&self) -> Venue {
        Venue::Waxpeer
    }

    async fn plan(&self, secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        let key = secrets
            .api_key(Venue::Waxpeer)
            .ok_or(ScrapeError::MissingApiKey(Venue::Waxpeer))?;
        Ok(FetchPlan::Single {
            url: format!("https://api.waxpeer.com/v1/prices?game=csgo&minified=0&api={key}"),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let response: PricesResponse =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if !response.success {
            return Err(ScrapeError::Parse("waxpeer success=false".into()));
        }
        let listings = response
            .items
            .into_iter()
            .map(|item| {
                let mut listing =
                    Listing::new(Venue::Waxpeer, item.name, item.min as f64 / 1000.0);
                if let Some(count) = item.count {
                    listing = listing.with_quantity(count);
                }
                if let Some(img) = item.img {
                    listing = listing.with_extra("image", serde_json::Value::String(img));
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

    #[tokio::test]
    async fn missing_key_fails_before_any_network() {
        let err = WaxpeerAdapter.plan(&Secrets::empty()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::MissingApiKey(Venue::Waxpeer)));
    }

    #[test]
    fn thousandths_convert_to_dollars() {
        let raw = br#"{
            "success": true,
            "items": [
                {"name": "AK-47 | Redline (Field-Tested)", "min": 37830, "count": 12, "img": "https://cdn/img.png"},
                {"name": "P250 | Sand Dune", "min": 30}
            ]
        }"#;
        let listings = WaxpeerAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 37.83);
        assert_eq!(listings[0].quantity, Some(12));
        assert_eq!(listings[1].price, 0.03);
        assert_eq!(listings[1].quantity, None);
    }

    #[test]
    fn failure_flag_is_a_parse_error() {
        assert!(WaxpeerAdapter
            .parse(br#"{"success": false, "items": []}"#)
            .is_err());
    }
}
