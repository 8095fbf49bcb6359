//! Provider billing reports: estimated costs and billable usage summaries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Charge type of a product's total
pub const TOTAL_CHARGE: &str = "total";

/// One charge of an estimated cost entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub product_name: String,
    /// `committed`, `on_demand` or `total`
    pub charge_type: String,
    /// Month-to-date cost up to and including the entry's date
    pub cost: Decimal,
}

impl Charge {
    pub fn total(product_name: impl Into<String>, cost: Decimal) -> Self {
        Self {
            product_name: product_name.into(),
            charge_type: TOTAL_CHARGE.to_string(),
            cost,
        }
    }

    pub fn is_total(&self) -> bool {
        self.charge_type == TOTAL_CHARGE
    }
}

/// Estimated cost of one organization on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedCostEntry {
    pub id: String,
    pub date: DateTime<Utc>,
    pub org_name: String,
    pub public_id: String,
    pub region: String,
    pub charges: Vec<Charge>,
}

/// Estimated cost report for a date range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedCostReport {
    pub entries: Vec<EstimatedCostEntry>,
}

impl EstimatedCostReport {
    /// Total charges of the most recent entry, by product name
    pub fn latest_totals(&self) -> BTreeMap<String, Decimal> {
        self.entries
            .iter()
            .max_by_key(|entry| entry.date)
            .map(|entry| {
                entry
                    .charges
                    .iter()
                    .filter(|charge| charge.is_total())
                    .map(|charge| (charge.product_name.clone(), charge.cost))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Billable usage of one billing dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillableBody {
    pub account_billable_usage: Option<i64>,
    pub usage_unit: Option<String>,
    pub billing_dimension: Option<String>,
}

/// Billable usage of one organization for a month, keyed by usage name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillableUsage {
    pub org_name: String,
    pub usage: BTreeMap<String, BillableBody>,
}

impl BillableUsage {
    /// Billable usage and unit for a billing dimension.
    ///
    /// A body whose declared billing dimension matches wins; otherwise the first
    /// usage name containing the dimension is used.
    pub fn lookup(&self, billing_dimension: &str) -> Option<(i64, String)> {
        let declared = self
            .usage
            .values()
            .find(|body| body.billing_dimension.as_deref() == Some(billing_dimension));
        let body = declared.or_else(|| {
            self.usage
                .iter()
                .find(|(name, _)| name.contains(billing_dimension))
                .map(|(_, body)| body)
        })?;

        let amount = body.account_billable_usage?;
        Some((amount, body.usage_unit.clone().unwrap_or_default()))
    }
}

/// Billable usage summary for a month
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillableSummary {
    pub usage: Vec<BillableUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn body(amount: i64, unit: &str, dimension: Option<&str>) -> BillableBody {
        BillableBody {
            account_billable_usage: Some(amount),
            usage_unit: Some(unit.to_string()),
            billing_dimension: dimension.map(str::to_string),
        }
    }

    #[test]
    fn test_lookup_prefers_declared_dimension() {
        let mut usage = BillableUsage::default();
        usage.usage.insert("apm_host_top99p".into(), body(3, "hosts", None));
        usage
            .usage
            .insert("apm_host_sum".into(), body(10, "hosts", Some("apm_host")));

        assert_eq!(usage.lookup("apm_host"), Some((10, "hosts".to_string())));
    }

    #[test]
    fn test_lookup_falls_back_to_name() {
        let mut usage = BillableUsage::default();
        usage.usage.insert("logs_indexed_15day_sum".into(), body(5000, "logs", None));

        assert_eq!(
            usage.lookup("logs_indexed_15day"),
            Some((5000, "logs".to_string()))
        );
        assert_eq!(usage.lookup("synthetics"), None);
    }

    #[test]
    fn test_latest_totals() {
        let entry = |day: u32, cost| EstimatedCostEntry {
            id: format!("e{day}"),
            date: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            org_name: "org".into(),
            public_id: "pub".into(),
            region: "us".into(),
            charges: vec![
                Charge::total("infra_host", cost),
                Charge {
                    product_name: "infra_host".into(),
                    charge_type: "committed".into(),
                    cost: dec!(1),
                },
            ],
        };
        let report = EstimatedCostReport {
            entries: vec![entry(2, dec!(20)), entry(1, dec!(10))],
        };

        assert_eq!(report.latest_totals().get("infra_host"), Some(&dec!(20)));
    }
}
