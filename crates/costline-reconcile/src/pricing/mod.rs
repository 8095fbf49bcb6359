//! Pricing module
//!
//! Provides the price catalog built once per invocation:
//! - PriceListing: marketplace page or billable-usage derived prices
//! - PriceCatalog: keyed unit prices with fuzzy dimension resolution

pub mod catalog;
pub mod listing;
pub mod matcher;

pub use catalog::{
    CatalogConfig, MatchStep, PriceCatalog, PriceCatalogEntry, PriceResolution, PricingMode,
};
pub use listing::{ListingDetail, PriceListing};
