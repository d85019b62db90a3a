//! Venue adapters and the shared scraping framework.

pub mod adapter;
mod de;

pub mod bitskins;
pub mod csdeals;
pub mod cstrade;
pub mod dynamic;
pub mod empire;
pub mod lisskins;
pub mod manncostore;
pub mod marketcsgo;
pub mod shadowpay;
pub mod skinout;
pub mod skinport;
pub mod steam; // steam_market + steam_listing + steamid nameid harvester
pub mod waxpeer;
pub mod white;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::Venue;
use crate::storage::SnapshotStore;

pub use adapter::{CancelFlag, FetchPlan, NameidTask, PageStyle, ScraperRunner, VenueAdapter};

/// Construct the adapter for one venue. Adapters that normalize foreign
/// currencies take their ratio from configuration, and the Steam nameid
/// pipeline shares the snapshot store.
pub fn build_adapter(
    venue: Venue,
    config: &AppConfig,
    store: &Arc<SnapshotStore>,
) -> Box<dyn VenueAdapter> {
    let ratio = config.scraper(venue).currency_ratio;
    match venue {
        Venue::Waxpeer => Box::new(waxpeer::WaxpeerAdapter),
        Venue::Skinport => Box::new(skinport::SkinportAdapter),
        Venue::Bitskins => Box::new(bitskins::BitskinsAdapter),
        Venue::SteamMarket => Box::new(steam::SteamMarketAdapter),
        Venue::SteamListing => Box::new(steam::SteamListingAdapter::new(store.clone())),
        Venue::SteamId => Box::new(steam::SteamIdAdapter::new(store.clone())),
        Venue::Empire => Box::new(empire::EmpireAdapter::new(ratio)),
        Venue::Shadowpay => Box::new(shadowpay::ShadowpayAdapter),
        Venue::CsDeals => Box::new(csdeals::CsDealsAdapter),
        Venue::CsTrade => Box::new(cstrade::CsTradeAdapter),
        Venue::LisSkins => Box::new(lisskins::LisSkinsAdapter::new(ratio)),
        Venue::MarketCsgo => Box::new(marketcsgo::MarketCsgoAdapter::new(ratio)),
        Venue::MannCoStore => Box::new(manncostore::MannCoStoreAdapter),
        Venue::TradeIt | Venue::RapidSkins | Venue::SkinDeck => {
            Box::new(dynamic::DynamicVenueAdapter::new(venue))
        }
        Venue::SkinOut => Box::new(skinout::SkinOutAdapter),
        Venue::White => Box::new(white::WhiteAdapter),
    }
}
