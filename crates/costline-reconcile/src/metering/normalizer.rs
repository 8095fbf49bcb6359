//! Usage normalization
//!
//! Rate dimensions (hosts, containers) are reported as the level observed in
//! each hour and pass through unchanged. Cumulative dimensions (ingested bytes,
//! indexed events) are month-to-date counters, so the usage of a window is the
//! difference to the previous reading of the same resource and dimension. A
//! reading below its prior means the counter restarted (new billing month), so
//! the reading itself is the usage since the restart.

use rust_decimal::Decimal;
use std::collections::HashMap;

/// Normalized quantity of one measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub quantity: Decimal,
    /// Set when the quantity had to be approximated; callers log it
    pub warning: Option<String>,
}

impl Normalized {
    /// Whether the measurement should produce a line item
    pub fn is_billable(&self) -> bool {
        !self.quantity.is_zero()
    }
}

/// Converts raw readings into window-scoped quantities
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageNormalizer;

impl UsageNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one reading of `dimension`
    pub fn normalize(
        &self,
        dimension: &str,
        current: Decimal,
        prior: Option<Decimal>,
        is_rate: bool,
    ) -> Normalized {
        if is_rate {
            return Normalized {
                quantity: current,
                warning: None,
            };
        }

        match prior {
            None => {
                let warning = format!(
                    "no prior reading for cumulative dimension {}, using current value {}",
                    dimension, current
                );
                Normalized {
                    quantity: current,
                    warning: Some(warning),
                }
            }
            Some(prior) if current < prior => {
                let warning = format!(
                    "cumulative dimension {} decreased from {} to {}, counting as a counter reset",
                    dimension, prior, current
                );
                Normalized {
                    quantity: current,
                    warning: Some(warning),
                }
            }
            Some(prior) => Normalized {
                quantity: current - prior,
                warning: None,
            },
        }
    }
}

/// Last cumulative reading per `(resource id, dimension)`
#[derive(Debug, Clone, Default)]
pub struct PriorReadings {
    readings: HashMap<(String, String), Decimal>,
}

impl PriorReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource_id: &str, dimension: &str) -> Option<Decimal> {
        self.readings
            .get(&(resource_id.to_string(), dimension.to_string()))
            .copied()
    }

    /// Record `value` as the latest reading, returning the one it replaces
    pub fn record(&mut self, resource_id: &str, dimension: &str, value: Decimal) -> Option<Decimal> {
        self.readings
            .insert((resource_id.to_string(), dimension.to_string()), value)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
