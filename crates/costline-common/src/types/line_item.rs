//! Cost line items - the output records of the pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Quantities below this are treated as zero usage
pub const ZERO_USAGE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Decimal places a cost is rounded to before it counts as zero
pub const COST_ROUNDING_DP: u32 = 4;

/// Charge category of a line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeCategory {
    /// Derived from metered usage and list pricing
    Usage,
    /// Taken from the provider's own cost estimate
    Billing,
}

impl fmt::Display for ChargeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeCategory::Usage => write!(f, "usage"),
            ChargeCategory::Billing => write!(f, "billing"),
        }
    }
}

/// One costed record for a single resource/dimension pair within a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLineItem {
    pub zone: String,
    pub account_name: String,
    pub charge_category: ChargeCategory,
    pub description: String,
    /// Usage dimension, or synthetic name after post-processing
    pub resource_name: String,
    /// Product family
    pub resource_type: String,
    /// Provider record ID
    pub id: String,
    /// Uniqueness key within a window: `<resource_id>/<resource_name>`
    pub provider_id: String,
    /// Provider resource the usage belongs to (organization public ID)
    pub resource_id: String,
    pub labels: BTreeMap<String, String>,
    pub usage_quantity: Decimal,
    pub usage_unit: String,
    pub list_unit_price: Decimal,
    pub list_cost: Decimal,
    pub billed_cost: Decimal,
}

impl CostLineItem {
    /// Create an empty usage line item for `resource_name` on `resource_id`
    pub fn usage(resource_id: impl Into<String>, resource_name: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        let resource_name = resource_name.into();
        Self {
            zone: String::new(),
            account_name: String::new(),
            charge_category: ChargeCategory::Usage,
            description: String::new(),
            provider_id: format!("{}/{}", resource_id, resource_name),
            resource_name,
            resource_type: String::new(),
            id: String::new(),
            resource_id,
            labels: BTreeMap::new(),
            usage_quantity: Decimal::ZERO,
            usage_unit: String::new(),
            list_unit_price: Decimal::ZERO,
            list_cost: Decimal::ZERO,
            billed_cost: Decimal::ZERO,
        }
    }

    /// Set quantity and unit price, recomputing list cost
    pub fn priced(mut self, quantity: Decimal, unit_price: Decimal) -> Self {
        self.usage_quantity = quantity;
        self.list_unit_price = unit_price;
        self.list_cost = quantity * unit_price;
        self
    }

    /// Rename the item, keeping its provider ID consistent with the new name
    pub fn relabel(&mut self, resource_name: &str, description: &str) {
        self.resource_name = resource_name.to_string();
        self.description = description.to_string();
        self.provider_id = format!("{}/{}", self.resource_id, resource_name);
    }

    /// Whether quantity and both costs are effectively zero
    pub fn is_effectively_zero(&self) -> bool {
        self.usage_quantity.abs() < ZERO_USAGE_EPSILON
            && self.list_cost.round_dp(COST_ROUNDING_DP).is_zero()
            && self.billed_cost.round_dp(COST_ROUNDING_DP).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_epsilon_value() {
        assert_eq!(ZERO_USAGE_EPSILON, dec!(0.001));
    }

    #[test]
    fn test_priced_computes_list_cost() {
        let item = CostLineItem::usage("org1", "host_count").priced(dec!(4), dec!(0.25));
        assert_eq!(item.list_cost, dec!(1.00));
        assert_eq!(item.provider_id, "org1/host_count");
        assert_eq!(item.charge_category, ChargeCategory::Usage);
    }

    #[test]
    fn test_relabel_updates_provider_id() {
        let mut item = CostLineItem::usage("org1", "host_count");
        item.relabel("other_hosts", "other hosts");
        assert_eq!(item.provider_id, "org1/other_hosts");
        assert_eq!(item.description, "other hosts");
    }

    #[test]
    fn test_effectively_zero() {
        let tiny = CostLineItem::usage("org1", "a").priced(dec!(0.0004), dec!(0.01));
        assert!(tiny.is_effectively_zero());

        let priced = CostLineItem::usage("org1", "b").priced(dec!(0.0004), dec!(10));
        assert!(!priced.is_effectively_zero());

        let mut billed = CostLineItem::usage("org1", "c");
        billed.billed_cost = dec!(2.5);
        assert!(!billed.is_effectively_zero());
    }
}
