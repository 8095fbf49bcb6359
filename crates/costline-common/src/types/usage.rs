//! Raw usage records as reported by a provider's usage-metering API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One named measurement of a usage record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Usage dimension name (e.g. `host_count`, `ingested_events_bytes`)
    pub usage_type: String,
    /// Reported value, unset when the provider has no data for the hour
    pub value: Option<Decimal>,
}

impl Measurement {
    pub fn new(usage_type: impl Into<String>, value: Option<Decimal>) -> Self {
        Self {
            usage_type: usage_type.into(),
            value,
        }
    }
}

/// Usage measurements for one resource and product family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Provider record ID
    pub id: String,
    /// Public ID of the owning organization
    pub public_id: String,
    /// Organization name
    pub org_name: String,
    /// Provider region
    pub region: String,
    /// Product family the measurements belong to
    pub product_family: String,
    /// Hour the measurements were taken for
    pub timestamp: Option<DateTime<Utc>>,
    /// Measurements reported for this record
    pub measurements: Vec<Measurement>,
}

impl UsageRecord {
    pub fn new(
        id: impl Into<String>,
        public_id: impl Into<String>,
        product_family: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            public_id: public_id.into(),
            org_name: String::new(),
            region: String::new(),
            product_family: product_family.into(),
            timestamp: None,
            measurements: Vec::new(),
        }
    }

    /// Set organization name and region
    pub fn with_org(mut self, org_name: impl Into<String>, region: impl Into<String>) -> Self {
        self.org_name = org_name.into();
        self.region = region.into();
        self
    }

    /// Add a measurement
    pub fn with_measurement(mut self, usage_type: impl Into<String>, value: Decimal) -> Self {
        self.measurements.push(Measurement::new(usage_type, Some(value)));
        self
    }

    /// Provider-scoped ID of one dimension of this record
    pub fn provider_id(&self, dimension: &str) -> String {
        format!("{}/{}", self.public_id, dimension)
    }
}

/// One page of the hourly usage listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    /// Cursor of the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

impl UsagePage {
    pub fn last(records: Vec<UsageRecord>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }

    pub fn with_cursor(records: Vec<UsageRecord>, cursor: impl Into<String>) -> Self {
        Self {
            records,
            next_cursor: Some(cursor.into()),
        }
    }
}
