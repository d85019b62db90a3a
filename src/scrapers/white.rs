//! White.market public price export.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};
use crate::scrapers::de::de_f64;

const EXPORT_URL: &str = "https://api.white.market/export/v1/prices/730.json";

#[derive(Debug, Deserialize)]
struct ExportRow {
    market_hash_name: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(default)]
    market_product_link: Option<String>,
}

pub struct WhiteAdapter;

#[async_trait]
impl VenueAdapter for WhiteAdapter {
    fn venue(&self) -> Venue {
        Venue::White
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: EXPORT_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let rows: Vec<ExportRow> =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut listing = Listing::new(Venue::White, row.market_hash_name, row.price);
                if let Some(link) = row.market_product_link {
                    listing = listing.with_url(link);
                }
                listing
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_rows_decode() {
        let raw = br#"[
            {"market_hash_name": "Tec-9 | Decimator (Minimal Wear)", "price": "3.30",
             "market_product_link": "https://white.market/item/t9-decimator-mw"}
        ]"#;
        let listings = WhiteAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 3.30);
        assert!(listings[0].url.as_deref().unwrap().contains("white.market"));
    }
}
