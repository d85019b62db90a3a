//! CS.Deals lowest-price feed.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};
use crate::scrapers::de::{de_f64, de_u64_opt};

const PRICING_URL: &str = "https://cs.deals/API/IPricing/GetLowestPrices/v1?appid=730";

#[derive(Debug, Deserialize)]
struct PricingResponse {
    success: bool,
    #[serde(default)]
    response: Option<PricingBody>,
}

#[derive(Debug, Deserialize)]
struct PricingBody {
    #[serde(default)]
    items: Vec<PricedItem>,
}

#[derive(Debug, Deserialize)]
struct PricedItem {
    marketname: String,
    #[serde(deserialize_with = "de_f64")]
    lowest_price: f64,
    #[serde(default, deserialize_with = "de_u64_opt")]
    quantity: Option<u64>,
}

pub struct CsDealsAdapter;

#[async_trait]
impl VenueAdapter for CsDealsAdapter {
    fn venue(&self) -> Venue {
        Venue::CsDeals
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        Ok(FetchPlan::Single {
            url: PRICING_URL.to_string(),
        })
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        let response: PricingResponse =
            serde_json::from_slice(raw).map_err(|e| ScrapeError::Parse(e.to_string()))?;
        if !response.success {
            return Err(ScrapeError::Parse("cs.deals success=false".into()));
        }
        let items = response.response.map(|body| body.items).unwrap_or_default();
        let listings = items
            .into_iter()
            .map(|item| {
                let mut listing = Listing::new(Venue::CsDeals, item.marketname, item.lowest_price);
                if let Some(quantity) = item.quantity {
                    listing = listing.with_quantity(quantity);
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
    fn nested_response_body_decodes() {
        let raw = br#"{"success": true, "response": {"items": [
            {"marketname": "AK-47 | Slate (Factory New)", "lowest_price": "4.12", "quantity": 31}
        ]}}"#;
        let listings = CsDealsAdapter.parse(raw).unwrap();
        assert_eq!(listings[0].price, 4.12);
        assert_eq!(listings[0].quantity, Some(31));
    }
}
