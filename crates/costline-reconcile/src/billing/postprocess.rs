//! Post-processing of a window's usage items
//!
//! The usage API reports some populations twice: totals alongside subsets of
//! the same total, and rolling-window counters alongside live counters. The
//! passes here turn that into non-overlapping items. They always run in the
//! same order: split, overlap removal, free allowance, zero pruning.

use costline_common::CostLineItem;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Replace a total and its included subset by `total - subset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRule {
    pub parent: String,
    pub subset: String,
    pub synthetic: String,
    pub description: String,
}

/// Replace a total by what is left after a retained subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeftoverRule {
    pub total: String,
    pub subset: String,
    pub synthetic: String,
    pub description: String,
}

/// Usage that is free up to a multiple of a companion dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowanceRule {
    pub metered: String,
    pub companion: String,
    pub free_per_unit: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub splits: Vec<SplitRule>,
    /// Dimensions dropped because another dimension already counts them
    pub overlapping: Vec<String>,
    pub leftovers: Vec<LeftoverRule>,
    pub allowances: Vec<AllowanceRule>,
}

impl PostProcessConfig {
    /// Rules for the Datadog usage-metering API
    pub fn datadog() -> Self {
        Self {
            splits: vec![
                SplitRule {
                    parent: "container_count".into(),
                    subset: "container_count_excl_agent".into(),
                    synthetic: "agent_container".into(),
                    description: "agent container".into(),
                },
                SplitRule {
                    parent: "host_count".into(),
                    subset: "agent_host_count".into(),
                    synthetic: "other_hosts".into(),
                    description: "other hosts".into(),
                },
            ],
            overlapping: vec![
                "logs_live_indexed_events_15_day_count".into(),
                "logs_live_indexed_count".into(),
            ],
            leftovers: vec![LeftoverRule {
                total: "indexed_events_count".into(),
                subset: "logs_indexed_events_15_day_count".into(),
                synthetic: "other_log_events".into(),
                description: "other log events".into(),
            }],
            allowances: vec![AllowanceRule {
                metered: "dbm_queries_count".into(),
                companion: "dbm_host_count".into(),
                free_per_unit: Decimal::from(200),
                unit: "queries".into(),
            }],
        }
    }
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self::datadog()
    }
}

/// Applies the post-processing passes to a window's usage items
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    config: PostProcessConfig,
}

impl PostProcessor {
    pub fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    /// Run every pass, returning items ordered by provider ID
    pub fn run(&self, items: Vec<CostLineItem>) -> Vec<CostLineItem> {
        let before = items.len();

        let items = self
            .config
            .splits
            .iter()
            .fold(items, |items, rule| split(items, rule));

        let items = self.remove_overlaps(items);

        let items = self
            .config
            .allowances
            .iter()
            .fold(items, |items, rule| apply_allowance(items, rule));

        let exempt: BTreeSet<&str> = self
            .config
            .allowances
            .iter()
            .map(|rule| rule.metered.as_str())
            .collect();
        let mut items: Vec<CostLineItem> = items
            .into_iter()
            .filter(|item| exempt.contains(item.resource_name.as_str()) || !item.is_effectively_zero())
            .collect();

        items.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        debug!(before, after = items.len(), "Post-processed window items");
        items
    }

    fn remove_overlaps(&self, items: Vec<CostLineItem>) -> Vec<CostLineItem> {
        let items: Vec<CostLineItem> = items
            .into_iter()
            .filter(|item| !self.config.overlapping.contains(&item.resource_name))
            .collect();

        self.config
            .leftovers
            .iter()
            .fold(items, |items, rule| leftover(items, rule))
    }
}

/// Quantities of `dimension` per resource ID
fn quantities_by_resource<'a, I>(items: I, dimension: &str) -> HashMap<String, Decimal>
where
    I: IntoIterator<Item = &'a CostLineItem>,
{
    let mut quantities = HashMap::new();
    for item in items.into_iter().filter(|item| item.resource_name == dimension) {
        *quantities.entry(item.resource_id.clone()).or_insert(Decimal::ZERO) += item.usage_quantity;
    }
    quantities
}

/// Turn `item` into a synthetic item of `quantity`, keeping its unit price
fn synthesize(mut item: CostLineItem, name: &str, description: &str, quantity: Decimal) -> CostLineItem {
    let quantity = if quantity.is_sign_negative() && !quantity.is_zero() {
        warn!(
            provider_id = %item.provider_id,
            synthetic = name,
            %quantity,
            "Subset exceeds its total, clamping synthetic quantity to zero"
        );
        Decimal::ZERO
    } else {
        quantity
    };

    item.relabel(name, description);
    item.usage_quantity = quantity;
    item.list_cost = quantity * item.list_unit_price;
    item
}

fn split(items: Vec<CostLineItem>, rule: &SplitRule) -> Vec<CostLineItem> {
    let (involved, mut rest): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.resource_name == rule.parent || item.resource_name == rule.subset);

    let subsets = quantities_by_resource(&involved, &rule.subset);
    for parent in involved.into_iter().filter(|item| item.resource_name == rule.parent) {
        let subset = subsets.get(&parent.resource_id).copied().unwrap_or(Decimal::ZERO);
        let quantity = parent.usage_quantity - subset;
        rest.push(synthesize(parent, &rule.synthetic, &rule.description, quantity));
    }
    rest
}

fn leftover(items: Vec<CostLineItem>, rule: &LeftoverRule) -> Vec<CostLineItem> {
    let (totals, mut rest): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.resource_name == rule.total);

    let subsets = quantities_by_resource(&rest, &rule.subset);
    for total in totals {
        let subset = subsets.get(&total.resource_id).copied().unwrap_or(Decimal::ZERO);
        let quantity = total.usage_quantity - subset;
        rest.push(synthesize(total, &rule.synthetic, &rule.description, quantity));
    }
    rest
}

fn apply_allowance(items: Vec<CostLineItem>, rule: &AllowanceRule) -> Vec<CostLineItem> {
    let companion: Decimal = items
        .iter()
        .filter(|item| item.resource_name == rule.companion)
        .map(|item| item.usage_quantity)
        .sum();
    let free = rule.free_per_unit * companion;

    items
        .into_iter()
        .filter_map(|mut item| {
            if item.resource_name != rule.metered {
                return Some(item);
            }
            let remaining = item.usage_quantity - free;
            if remaining <= Decimal::ZERO {
                debug!(provider_id = %item.provider_id, %free, "Usage fully covered by free allowance");
                return None;
            }
            item.usage_quantity = remaining;
            item.list_unit_price = Decimal::ZERO;
            item.list_cost = Decimal::ZERO;
            item.usage_unit = rule.unit.clone();
            Some(item)
        })
        .collect()
}
