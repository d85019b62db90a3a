//! LIS-Skins full catalog export. Prices are RUB; the ratio is config.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};
use crate::scrapers::de::{de_f64, de_u64_opt};

const EXPORT_URL: &str = "https://lis-skins.com/market_export_json/api_csgo_full.json";

#[derive(Debug, Deserialize)]
struct ExportRow {
    name: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(default, deserialize_with = "de_u64_opt")]
    count: Option<u64>,
    #[serde(default)]
    url: Option<String>,
}

pub struct LisSkinsAdapter {
    currency_ratio: f64,
}

impl LisSkinsAdapter {
    pub fn new(currency_ratio: f64) -> Self {
        Self { currency_ratio }
    }
}

#[async_trait]
impl VenueAdapter for LisSkinsAdapter {
    fn venue(&self) -> Venue {
        Venue::LisSkins
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: EXPORT_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let rows: Vec<ExportRow> =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = rows
            .into_iter()
            .map(|row| {
                let usd = (row.price * self.currency_ratio * 100.0).round() / 100.0;
                let mut listing = Listing::new(Venue::LisSkins, row.name, usd)
                    .with_extra("price_rub", serde_json::json!(row.price));
                if let Some(count) = row.count {
                    listing = listing.with_quantity(count);
                }
                if let Some(url) = row.url {
                    listing = listing.with_url(url);
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
    fn rub_converts_through_ratio() {
        let adapter = LisSkinsAdapter::new(0.011);
        let raw = br#"[
            {"name": "AK-47 | Asiimov (Field-Tested)", "price": 3445.5, "count": 3,
             "url": "https://lis-skins.com/market/csgo/ak-47-asiimov-field-tested"}
        ]"#;
        let listings = adapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 37.90);
        assert_eq!(listings[0].quantity, Some(3));
        assert_eq!(
            listings[0].extra.as_ref().unwrap()["price_rub"],
            serde_json::json!(3445.5)
        );
    }
}
