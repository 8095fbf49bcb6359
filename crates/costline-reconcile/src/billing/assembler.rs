//! Cost line item assembly
//!
//! Usage items are keyed by provider ID (`<resource id>/<dimension>`), so a
//! dimension reported on several pages or hours of one window accumulates into
//! a single item. Billing items come from the provider's own month-to-date
//! cost estimate and are assembled separately.

use costline_common::{ChargeCategory, CostLineItem, EstimatedCostReport, Resolution, UsageRecord, Window};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::pricing::{PriceCatalog, PriceResolution};

/// Builds the usage line items of one window
#[derive(Debug, Default)]
pub struct CostAssembler {
    items: BTreeMap<String, CostLineItem>,
}

impl CostAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `quantity` of `dimension` into the window's items
    pub fn assemble(
        &mut self,
        record: &UsageRecord,
        dimension: &str,
        quantity: Decimal,
        resolution: &PriceResolution<'_>,
    ) {
        let provider_id = record.provider_id(dimension);
        let unit_price = resolution.unit_price();

        if let Some(item) = self.items.get_mut(&provider_id) {
            item.usage_quantity += quantity;
            item.list_cost += quantity * item.list_unit_price;
            trace!(provider_id = %provider_id, %quantity, "Accumulated usage into existing item");
            return;
        }

        let mut item = CostLineItem::usage(&record.public_id, dimension).priced(quantity, unit_price);
        item.zone = record.region.clone();
        item.account_name = record.org_name.clone();
        item.resource_type = record.product_family.clone();
        item.id = record.id.clone();
        match resolution.entry {
            Some(entry) => {
                item.description = entry.description.clone();
                item.usage_unit = entry.usage_unit.clone();
            }
            None => {
                item.description = PriceCatalog::unpriced_description(&record.product_family);
            }
        }
        self.items.insert(provider_id, item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ordered by provider ID
    pub fn finish(self) -> Vec<CostLineItem> {
        self.items.into_values().collect()
    }

    /// Billing items of `window` from a month-to-date estimated cost report.
    ///
    /// Charges are running totals, so each day's cost is the difference to the
    /// previous total of the same organization and product. Only entries dated
    /// on the window's start day are attributed, scaled down for hourly windows.
    pub fn assemble_billing(report: &EstimatedCostReport, window: &Window) -> Vec<CostLineItem> {
        let cost_factor = match window.resolution() {
            Resolution::Daily => Decimal::ONE,
            Resolution::Hourly => Decimal::ONE / Decimal::from(24),
        };
        let window_day = window.start().date_naive();

        let mut entries: Vec<_> = report.entries.iter().collect();
        entries.sort_by_key(|entry| entry.date);

        let mut previous: HashMap<(&str, &str), Decimal> = HashMap::new();
        let mut items: BTreeMap<String, CostLineItem> = BTreeMap::new();

        for entry in entries {
            for charge in entry.charges.iter().filter(|c| c.is_total() && !c.cost.is_zero()) {
                let key = (entry.public_id.as_str(), charge.product_name.as_str());
                let daily = match previous.insert(key, charge.cost) {
                    Some(prior) => charge.cost - prior,
                    None => charge.cost,
                };

                if entry.date.date_naive() != window_day {
                    continue;
                }

                let cost = daily * cost_factor;
                let provider_id = format!("{}/{}", entry.public_id, charge.product_name);
                if let Some(item) = items.get_mut(&provider_id) {
                    item.billed_cost += cost;
                    continue;
                }

                let mut item = CostLineItem::usage(&entry.public_id, &charge.product_name);
                item.charge_category = ChargeCategory::Billing;
                item.zone = entry.region.clone();
                item.account_name = entry.org_name.clone();
                item.id = if entry.id.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    entry.id.clone()
                };
                item.billed_cost = cost;
                items.insert(provider_id, item);
            }
        }

        debug!(window = %window, items = items.len(), "Assembled billing items");
        items.into_values().collect()
    }
}
