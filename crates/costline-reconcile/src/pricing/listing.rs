//! Provider price listings
//!
//! A listing is the raw material of the catalog. It is read either from the
//! public marketplace page, which embeds the list prices as a JavaScript
//! object, or derived from the account's own estimated cost and billable usage.

use costline_common::{BillableSummary, CatalogError, EstimatedCostReport, DEFAULT_CURRENCY};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, warn};

const PRODUCT_DETAIL_PATTERN: &str = r"var productDetailData = \s*(.*?)\s*;";

/// One priced product of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListingDetail {
    pub name: String,
    pub description: String,
    /// Unit the rate is quoted in (e.g. `hosts`, `GB`)
    pub units: String,
    /// Monthly list rate for rate-priced products, price per unit otherwise
    pub rate: Decimal,
    pub currency: String,
    /// The source already knows the product is priced per host-month
    pub rate_priced: bool,
}

/// Products and prices offered by a provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceListing {
    pub details: Vec<ListingDetail>,
}

impl PriceListing {
    /// Extract the listing embedded in the marketplace product page
    pub fn from_marketplace_page(html: &str) -> Result<Self, CatalogError> {
        let pattern = Regex::new(PRODUCT_DETAIL_PATTERN)
            .map_err(|e| CatalogError::SourceUnavailable(format!("product detail pattern: {}", e)))?;

        let blocks: Vec<&str> = pattern
            .captures_iter(html)
            .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
            .collect();
        if blocks.len() != 1 {
            return Err(CatalogError::ProductDataCount {
                found: blocks.len(),
            });
        }

        let data: ProductDetailData = serde_json::from_str(blocks[0])
            .map_err(|e| CatalogError::InvalidJson(e.to_string()))?;

        let details = data
            .offer_data
            .pricing_information
            .details
            .into_iter()
            .map(|detail| {
                let rate = Decimal::from_str(detail.one_month.rate.trim()).map_err(|_| {
                    CatalogError::InvalidRate {
                        key: detail.name.clone(),
                        rate: detail.one_month.rate.clone(),
                    }
                })?;
                Ok(ListingDetail {
                    name: detail.name,
                    description: detail.description,
                    units: detail.units,
                    rate,
                    currency: detail.one_month.currency,
                    rate_priced: false,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        debug!(products = details.len(), "Parsed marketplace price listing");
        Ok(Self { details })
    }

    /// Derive unit prices from the account's own month-to-date spend.
    ///
    /// The unit price of a product is its latest `total` charge divided by the
    /// billable usage of the matching billing dimension. Products without
    /// billable usage are left out.
    pub fn from_billable_usage(
        summary: &BillableSummary,
        report: &EstimatedCostReport,
    ) -> Result<Self, CatalogError> {
        if report.entries.is_empty() {
            return Err(CatalogError::EmptyCostReport);
        }
        let totals = report.latest_totals();

        let mut details = Vec::new();
        for usage in &summary.usage {
            for (product, cost) in &totals {
                let Some((amount, unit)) = usage.lookup(product) else {
                    warn!(product = %product, org = %usage.org_name, "No billable usage for product");
                    continue;
                };
                if amount == 0 {
                    continue;
                }

                details.push(ListingDetail {
                    name: product.clone(),
                    description: product.clone(),
                    units: unit,
                    rate: *cost / Decimal::from(amount),
                    currency: DEFAULT_CURRENCY.to_string(),
                    rate_priced: product.contains("host"),
                });
            }
        }

        debug!(products = details.len(), "Derived unit prices from billable usage");
        Ok(Self { details })
    }
}

#[derive(Debug, Deserialize)]
struct ProductDetailData {
    #[serde(rename = "offerData")]
    offer_data: OfferData,
}

#[derive(Debug, Deserialize)]
struct OfferData {
    #[serde(rename = "PricingInformation")]
    pricing_information: PricingInformation,
}

#[derive(Debug, Deserialize)]
struct PricingInformation {
    #[serde(rename = "Details", default)]
    details: Vec<WireDetail>,
}

#[derive(Debug, Deserialize)]
struct WireDetail {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "DetailDescription", default)]
    description: String,
    #[serde(rename = "Units", default)]
    units: String,
    #[serde(rename = "1MONTHS", default)]
    one_month: WireRate,
}

#[derive(Debug, Default, Deserialize)]
struct WireRate {
    #[serde(rename = "Rate", default)]
    rate: String,
    #[serde(rename = "Currency", default)]
    currency: String,
}
