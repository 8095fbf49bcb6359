//! Price catalog
//!
//! The catalog maps canonical pricing keys to unit prices and resolves the
//! provider's usage identifiers onto those keys. Usage reports and price lists
//! name things differently, so resolution falls through a fixed ladder of
//! strategies: alias table, direct key, token subset, synonym substitution and
//! finally the closest key by edit distance.

use costline_common::HOURS_PER_MONTH;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

use super::listing::PriceListing;
use super::matcher;

/// Static tables that drive catalog construction and resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Usage dimension or product family -> pricing key
    pub aliases: BTreeMap<String, String>,
    /// Pricing key -> number of usage units the list price is quoted for
    pub unit_scales: BTreeMap<String, Decimal>,
    /// Pricing keys whose list price is per resource-month
    pub rate_families: BTreeSet<String>,
    pub hours_per_month: u32,
    /// Suffixes stripped from usage dimensions before matching
    pub strip_suffixes: Vec<String>,
    /// Identifiers too vague to fuzzy match
    pub generic_identifiers: BTreeSet<String>,
    /// Substring substitutions tried when nothing matches as-is
    pub synonyms: BTreeMap<String, String>,
}

impl CatalogConfig {
    /// Tables for the Datadog usage-metering API
    pub fn datadog() -> Self {
        let aliases = [
            ("timeseries", "custom_metrics"),
            ("apm_uncategorized_host_count", "apm_hosts"),
            ("apm_host_count_incl_usm", "apm_hosts"),
            ("apm_azure_app_service_host_count", "apm_hosts"),
            ("apm_devsecops_host_count", "apm_hosts"),
            ("apm_host_count", "apm_hosts"),
            ("opentelemetry_apm_host_count", "apm_hosts"),
            ("apm_fargate_count", "apm_hosts"),
            ("container_count", "containers"),
            ("container_count_excl_agent", "containers"),
            ("billable_ingested_bytes", "ingested_logs"),
            ("ingested_events_bytes", "ingested_logs"),
            ("logs_live_ingested_bytes", "ingested_logs"),
            ("logs_rehydrated_ingested_bytes", "ingested_logs"),
            ("indexed_events_count", "indexed_logs"),
            ("logs_live_indexed_count", "indexed_logs"),
            ("synthetics_api", "api_tests"),
            ("synthetics_browser", "browser_checks"),
            ("tasks_count", "fargate_tasks"),
            ("rum", "rum_events"),
            ("analyzed_logs", "security_logs"),
            ("snmp", "snmp_device"),
            ("invocations_sum", "serverless_inv"),
        ];

        let tebibyte = Decimal::from(1_099_511_627_776_i64);
        let unit_scales = [
            ("custom_metrics", Decimal::from(100)),
            ("indexed_logs", Decimal::from(1_000_000)),
            ("ingested_logs", tebibyte),
            ("api_tests", Decimal::from(10_000)),
            ("browser_checks", Decimal::from(1_000)),
            ("rum_events", Decimal::from(10_000)),
            ("security_logs", tebibyte),
            ("serverless_inv", Decimal::from(1_000_000)),
        ];

        Self {
            aliases: aliases
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            unit_scales: unit_scales
                .into_iter()
                .map(|(key, scale)| (key.to_string(), scale))
                .collect(),
            rate_families: ["infra_hosts", "apm_hosts", "containers"]
                .into_iter()
                .map(String::from)
                .collect(),
            hours_per_month: HOURS_PER_MONTH,
            strip_suffixes: vec!["_count".to_string()],
            generic_identifiers: ["host".to_string()].into_iter().collect(),
            synonyms: [("agent".to_string(), "infra".to_string())].into_iter().collect(),
        }
    }

    fn strip(&self, dimension: &str) -> String {
        self.strip_suffixes
            .iter()
            .find_map(|suffix| dimension.strip_suffix(suffix.as_str()))
            .unwrap_or(dimension)
            .to_string()
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::datadog()
    }
}

/// How a catalog entry turns usage into cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// Monthly list price spread over the hours of a month, usage in hours
    Rate,
    /// Price per consumed unit
    Unit,
}

/// One priced catalog key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCatalogEntry {
    pub key: String,
    pub unit_price: Decimal,
    pub currency: String,
    pub description: String,
    pub usage_unit: String,
    pub mode: PricingMode,
}

/// Ladder step that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    Alias,
    Direct,
    TokenSubset,
    Synonym,
    EditDistance,
    Unmatched,
}

impl fmt::Display for MatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStep::Alias => "alias",
            MatchStep::Direct => "direct",
            MatchStep::TokenSubset => "token_subset",
            MatchStep::Synonym => "synonym",
            MatchStep::EditDistance => "edit_distance",
            MatchStep::Unmatched => "unmatched",
        };
        f.write_str(name)
    }
}

/// Outcome of resolving a usage dimension
#[derive(Debug, Clone, PartialEq)]
pub struct PriceResolution<'a> {
    /// Matched catalog key, or the identifier that was looked for
    pub key: String,
    pub entry: Option<&'a PriceCatalogEntry>,
    pub step: MatchStep,
    /// Whether the dimension reports a level rather than a running total
    pub rate: bool,
}

impl PriceResolution<'_> {
    pub fn is_matched(&self) -> bool {
        self.entry.is_some()
    }

    /// Unit price, zero when unpriced
    pub fn unit_price(&self) -> Decimal {
        self.entry.map(|e| e.unit_price).unwrap_or(Decimal::ZERO)
    }
}

/// Queryable price list, read-only once built
#[derive(Debug, Clone)]
pub struct PriceCatalog {
    entries: BTreeMap<String, PriceCatalogEntry>,
    config: CatalogConfig,
}

impl PriceCatalog {
    /// Build the catalog from a listing. Later listing details win on key clashes.
    pub fn build(listing: &PriceListing, config: CatalogConfig) -> Self {
        let hours = Decimal::from(config.hours_per_month.max(1));
        let mut entries = BTreeMap::new();

        for detail in &listing.details {
            let rate_priced = detail.rate_priced || config.rate_families.contains(&detail.name);
            let entry = if rate_priced {
                let unit = detail.units.strip_suffix('s').unwrap_or(&detail.units);
                PriceCatalogEntry {
                    key: detail.name.clone(),
                    unit_price: detail.rate / hours,
                    currency: detail.currency.clone(),
                    description: detail.description.clone(),
                    usage_unit: format!("{} - hours", unit),
                    mode: PricingMode::Rate,
                }
            } else {
                let unit_price = match config.unit_scales.get(&detail.name) {
                    Some(scale) if !scale.is_zero() => detail.rate / *scale,
                    _ => detail.rate,
                };
                PriceCatalogEntry {
                    key: detail.name.clone(),
                    unit_price,
                    currency: detail.currency.clone(),
                    description: detail.description.clone(),
                    usage_unit: detail.units.clone(),
                    mode: PricingMode::Unit,
                }
            };
            entries.insert(detail.name.clone(), entry);
        }

        debug!(entries = entries.len(), "Built price catalog");
        Self { entries, config }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PriceCatalogEntry> {
        self.entries.get(key)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Currency of the catalog, taken from its first priced entry
    pub fn currency(&self) -> Option<&str> {
        self.entries
            .values()
            .map(|entry| entry.currency.as_str())
            .find(|currency| !currency.is_empty())
    }

    /// Description used for dimensions with no price
    pub fn unpriced_description(product_family: &str) -> String {
        format!("{} PRICING UNAVAILABLE", product_family)
    }

    /// Resolve a usage dimension of `product_family` to a catalog entry
    pub fn resolve(&self, dimension: &str, product_family: &str) -> PriceResolution<'_> {
        let alias = self
            .config
            .aliases
            .get(dimension)
            .or_else(|| self.config.aliases.get(product_family));
        let identifier = match alias {
            Some(alias) => {
                if let Some(entry) = self.entries.get(alias) {
                    return self.matched(entry, MatchStep::Alias);
                }
                alias.clone()
            }
            None => self.config.strip(dimension),
        };

        if let Some(entry) = self.entries.get(&identifier) {
            return self.matched(entry, MatchStep::Direct);
        }

        if self.config.generic_identifiers.contains(&identifier) {
            return match self.entries.get(product_family) {
                Some(entry) => self.matched(entry, MatchStep::Direct),
                None => self.unmatched(product_family, product_family),
            };
        }

        let keys = || self.entries.keys().map(String::as_str);

        if let Some(key) = matcher::token_subset_match(&identifier, keys()) {
            return self.matched(&self.entries[key], MatchStep::TokenSubset);
        }

        let substituted = self
            .config
            .synonyms
            .iter()
            .fold(identifier.clone(), |acc, (from, to)| acc.replace(from.as_str(), to));
        if substituted != identifier {
            if let Some(key) = matcher::token_subset_match(&substituted, keys()) {
                return self.matched(&self.entries[key], MatchStep::Synonym);
            }
        }

        if let Some(key) = matcher::closest_match(&identifier, keys()) {
            return self.matched(&self.entries[key], MatchStep::EditDistance);
        }

        self.unmatched(&identifier, product_family)
    }

    fn matched<'a>(&'a self, entry: &'a PriceCatalogEntry, step: MatchStep) -> PriceResolution<'a> {
        PriceResolution {
            key: entry.key.clone(),
            entry: Some(entry),
            step,
            rate: entry.mode == PricingMode::Rate,
        }
    }

    fn unmatched(&self, identifier: &str, product_family: &str) -> PriceResolution<'_> {
        warn!(identifier, product_family, "No catalog price for usage dimension, pricing at zero");
        PriceResolution {
            key: identifier.to_string(),
            entry: None,
            step: MatchStep::Unmatched,
            rate: self.config.rate_families.contains(identifier)
                || self.config.rate_families.contains(product_family),
        }
    }
}
