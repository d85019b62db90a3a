//! Cross-venue profitability: the Steam fee schedule and the opportunity
//! scan that joins venue catalogs against Steam reference prices.

pub mod engine;
pub mod fees;

pub use engine::{ProfitabilityEngine, ScanParams};
pub use fees::net_sale_price;
