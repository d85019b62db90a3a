//! Mannco.store catalog. Cent prices, offset pagination, WAF-fronted
//! (low-level client selected via config).

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, PageStyle, VenueAdapter};
use crate::scrapers::de::de_u64_opt;

const ITEMS_URL: &str = "https://mannco.store/items/get?appid=730&sort=price&order=ASC&count=100";

#[derive(Debug, Deserialize)]
struct StoreItem {
    name: String,
    /// Cents.
    price: u64,
    #[serde(default, deserialize_with = "de_u64_opt")]
    stock: Option<u64>,
}

pub struct MannCoStoreAdapter;

#[async_trait]
impl VenueAdapter for MannCoStoreAdapter {
    fn venue(&self) -> Venue {
        Venue::MannCoStore
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Paginated {
            base_url: ITEMS_URL.to_string(),
            page_param: "skip",
            page_size: 100,
            style: PageStyle::Offset,
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let items: Vec<StoreItem> =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        let listings = items
            .into_iter()
            .map(|item| {
                let mut listing =
                    Listing::new(Venue::MannCoStore, item.name, item.price as f64 / 100.0);
                if let Some(stock) = item.stock {
                    listing = listing.with_extra("quantity_raw", serde_json::json!(stock));
                }
                listing
            })
            .collect();
        Ok(listings)
    }
}
