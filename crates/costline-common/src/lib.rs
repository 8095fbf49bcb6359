//! # Costline Common
//!
//! Shared types and errors for the Costline usage reconciliation pipeline.
//!
//! ## Core Types
//!
//! - [`Window`]: closed-open `[start, end)` query window and its splitter
//! - [`UsageRecord`]/[`UsagePage`]: raw provider usage measurements
//! - [`EstimatedCostReport`]/[`BillableSummary`]: provider billing reports
//! - [`CostLineItem`]: normalized, priced output record
//! - [`WindowResponse`]: per-window result with error strings

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{CatalogError, CostlineError, ProviderError, Result, WindowError};
pub use types::{
    billing::{BillableBody, BillableSummary, BillableUsage, Charge, EstimatedCostEntry, EstimatedCostReport},
    line_item::{ChargeCategory, CostLineItem, COST_ROUNDING_DP, ZERO_USAGE_EPSILON},
    response::{CostRequest, ResponseTags, WindowResponse},
    usage::{Measurement, UsagePage, UsageRecord},
    window::{Resolution, Window},
};

/// Costline version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hours used to turn a monthly list price into an hourly rate
pub const HOURS_PER_MONTH: u32 = 730;

/// Provider cost estimates lag real usage by up to this many hours
pub const ESTIMATE_DELAY_HOURS: i64 = 72;

/// Default currency of provider list prices
pub const DEFAULT_CURRENCY: &str = "USD";
