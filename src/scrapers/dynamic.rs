//! SPA-rendered venues (TradeIt, RapidSkins, SkinDeck).
//!
//! Their catalogs only exist after client-side rendering, which needs a
//! full browser stack, which is an external collaborator. The framework
//! short-circuits these to an empty snapshot with a documented reason; the
//! adapter exists so the venue stays in the closed set and a rendering
//! implementation can plug in later.

use async_trait::async_trait;

use crate::config::Secrets;
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue};
use crate::scrapers::adapter::{FetchPlan, VenueAdapter};

pub struct DynamicVenueAdapter {
    venue: Venue,
}

impl DynamicVenueAdapter {
    pub fn new(venue: Venue) -> Self {
        Self { venue }
    }
}

#[async_trait]
impl VenueAdapter for DynamicVenueAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn plan(&self, _secrets: &Secrets) -> Result<FetchPlan, ScrapeError> {
        // Only reachable if someone disables `dynamic_content` in config
        // without providing a rendering backend.
        Err(ScrapeError::Config(format!(
            "{} requires browser rendering",
            self.venue
        )))
    }

    fn parse(&self, _raw: &[u8]) -> Result<Vec<Listing>, ScrapeError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plan_refuses_without_a_renderer() {
        let adapter = DynamicVenueAdapter::new(Venue::TradeIt);
        assert!(matches!(
            adapter.plan(&Secrets::empty()).await.unwrap_err(),
            ScrapeError::Config(_)
        ));
    }
}
