//! Provider API client
//!
//! [`UsageApi`] is the seam between the pipeline and the provider: the
//! pipeline only ever sees domain types, and tests substitute a scripted
//! implementation. [`DatadogClient`] is the HTTP implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use costline_common::{
    BillableBody, BillableSummary, BillableUsage, Charge, EstimatedCostEntry,
    EstimatedCostReport, Measurement, ProviderError, UsagePage, UsageRecord, Window,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::ProviderSettings;

/// Read access to a provider's usage and billing APIs
#[async_trait]
pub trait UsageApi: Send + Sync {
    /// One page of hourly usage for `window`, all product families
    async fn hourly_usage(
        &self,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<UsagePage, ProviderError>;

    /// Month-to-date estimated cost by organization, one entry per day
    async fn estimated_costs(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<EstimatedCostReport, ProviderError>;

    /// Billable usage summary for the month containing `month`
    async fn billable_summary(&self, month: NaiveDate) -> Result<BillableSummary, ProviderError>;

    /// Raw HTML of the public pricing listing
    async fn pricing_page(&self, url: &str) -> Result<String, ProviderError>;
}

/// HTTP client for the Datadog usage-metering APIs
pub struct DatadogClient {
    http: reqwest::Client,
    base_url: String,
}

impl DatadogClient {
    /// Build a client for `settings.site` (e.g. `datadoghq.com`)
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let base_url = format!("https://api.{}", settings.site);
        Self::with_base_url(settings, base_url)
    }

    /// Build a client against an explicit base URL
    pub fn with_base_url(
        settings: &ProviderSettings,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("DD-API-KEY", header_value(&settings.api_key)?);
        headers.insert("DD-APPLICATION-KEY", header_value(&settings.app_key)?);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let body = self.get_text(&url, query).await?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", path, e)))
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, ProviderError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), body = %body, "Provider returned non-success status");
            return Err(ProviderError::from_status(status.as_u16(), body));
        }
        Ok(body)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value)
        .map_err(|_| ProviderError::Transport("credential contains invalid header characters".into()))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl UsageApi for DatadogClient {
    #[instrument(skip(self), fields(window = %window))]
    async fn hourly_usage(
        &self,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<UsagePage, ProviderError> {
        let mut query = vec![
            ("filter[timestamp][start]", timestamp(window.start())),
            ("filter[timestamp][end]", timestamp(window.end())),
            ("filter[product_families]", "all".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("page[next_record_id]", cursor.to_string()));
        }

        let wire: HourlyUsageResponse = self.get_json("/api/v2/usage/hourly_usage", &query).await?;
        Ok(wire.into())
    }

    #[instrument(skip(self))]
    async fn estimated_costs(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<EstimatedCostReport, ProviderError> {
        let query = [
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
            ("view", "sub-org".to_string()),
        ];
        let wire: CostByOrgResponse = self.get_json("/api/v2/usage/estimated_cost", &query).await?;
        Ok(wire.into())
    }

    #[instrument(skip(self))]
    async fn billable_summary(&self, month: NaiveDate) -> Result<BillableSummary, ProviderError> {
        let query = [("month", month.format("%Y-%m").to_string())];
        let wire: BillableSummaryResponse =
            self.get_json("/api/v1/usage/billable-summary", &query).await?;
        Ok(wire.into())
    }

    #[instrument(skip(self))]
    async fn pricing_page(&self, url: &str) -> Result<String, ProviderError> {
        self.get_text(url, &[]).await
    }
}

// ============ WIRE FORMAT ============

#[derive(Debug, Deserialize)]
struct HourlyUsageResponse {
    #[serde(default)]
    data: Vec<HourlyUsageData>,
    meta: Option<UsageMeta>,
}

#[derive(Debug, Deserialize)]
struct HourlyUsageData {
    #[serde(default)]
    id: String,
    attributes: HourlyUsageAttributes,
}

#[derive(Debug, Deserialize)]
struct HourlyUsageAttributes {
    #[serde(default)]
    org_name: String,
    #[serde(default)]
    public_id: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    product_family: String,
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    measurements: Vec<WireMeasurement>,
}

#[derive(Debug, Deserialize)]
struct WireMeasurement {
    usage_type: String,
    #[serde(default)]
    value: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct UsageMeta {
    pagination: Option<UsagePagination>,
}

#[derive(Debug, Deserialize)]
struct UsagePagination {
    next_record_id: Option<String>,
}

impl From<HourlyUsageResponse> for UsagePage {
    fn from(wire: HourlyUsageResponse) -> Self {
        let records = wire
            .data
            .into_iter()
            .map(|data| {
                let attrs = data.attributes;
                UsageRecord {
                    id: data.id,
                    public_id: attrs.public_id,
                    org_name: attrs.org_name,
                    region: attrs.region,
                    product_family: attrs.product_family,
                    timestamp: attrs.timestamp,
                    measurements: attrs
                        .measurements
                        .into_iter()
                        .map(|m| Measurement::new(m.usage_type, m.value))
                        .collect(),
                }
            })
            .collect();

        let next_cursor = wire
            .meta
            .and_then(|meta| meta.pagination)
            .and_then(|pagination| pagination.next_record_id)
            .filter(|cursor| !cursor.is_empty());

        UsagePage {
            records,
            next_cursor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CostByOrgResponse {
    #[serde(default)]
    data: Vec<CostByOrgData>,
}

#[derive(Debug, Deserialize)]
struct CostByOrgData {
    #[serde(default)]
    id: String,
    attributes: CostByOrgAttributes,
}

#[derive(Debug, Deserialize)]
struct CostByOrgAttributes {
    date: DateTime<Utc>,
    #[serde(default)]
    org_name: String,
    #[serde(default)]
    public_id: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    charges: Vec<WireCharge>,
}

#[derive(Debug, Deserialize)]
struct WireCharge {
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    charge_type: String,
    #[serde(default)]
    cost: Decimal,
}

impl From<CostByOrgResponse> for EstimatedCostReport {
    fn from(wire: CostByOrgResponse) -> Self {
        let entries = wire
            .data
            .into_iter()
            .map(|data| {
                let attrs = data.attributes;
                EstimatedCostEntry {
                    id: data.id,
                    date: attrs.date,
                    org_name: attrs.org_name,
                    public_id: attrs.public_id,
                    region: attrs.region,
                    charges: attrs
                        .charges
                        .into_iter()
                        .map(|c| Charge {
                            product_name: c.product_name,
                            charge_type: c.charge_type,
                            cost: c.cost,
                        })
                        .collect(),
                }
            })
            .collect();
        EstimatedCostReport { entries }
    }
}

#[derive(Debug, Deserialize)]
struct BillableSummaryResponse {
    #[serde(default)]
    usage: Vec<WireBillableUsage>,
}

#[derive(Debug, Deserialize)]
struct WireBillableUsage {
    #[serde(default)]
    org_name: String,
    #[serde(default)]
    usage: BTreeMap<String, serde_json::Value>,
}

impl From<BillableSummaryResponse> for BillableSummary {
    fn from(wire: BillableSummaryResponse) -> Self {
        let usage = wire
            .usage
            .into_iter()
            .map(|entry| BillableUsage {
                org_name: entry.org_name,
                // Bodies that don't look like billable usage are skipped
                usage: entry
                    .usage
                    .into_iter()
                    .filter_map(|(name, value)| {
                        serde_json::from_value::<BillableBody>(value)
                            .ok()
                            .map(|body| (name, body))
                    })
                    .collect(),
            })
            .collect();
        BillableSummary { usage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_hourly_usage_wire_conversion() {
        let wire: HourlyUsageResponse = serde_json::from_value(json!({
            "data": [{
                "id": "rec-1",
                "type": "usage_timeseries",
                "attributes": {
                    "org_name": "Acme",
                    "public_id": "abc123",
                    "region": "us",
                    "product_family": "infra_hosts",
                    "timestamp": "2024-03-11T00:00:00Z",
                    "measurements": [
                        {"usage_type": "host_count", "value": 12},
                        {"usage_type": "agent_host_count", "value": null}
                    ]
                }
            }],
            "meta": {"pagination": {"next_record_id": "cursor-2"}}
        }))
        .unwrap();

        let page: UsagePage = wire.into();
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-2"));
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.public_id, "abc123");
        assert_eq!(record.measurements[0].value, Some(dec!(12)));
        assert_eq!(record.measurements[1].value, None);
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let wire: HourlyUsageResponse = serde_json::from_value(json!({
            "data": [],
            "meta": {"pagination": {"next_record_id": null}}
        }))
        .unwrap();
        let page: UsagePage = wire.into();
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_cost_by_org_wire_conversion() {
        let wire: CostByOrgResponse = serde_json::from_value(json!({
            "data": [{
                "id": "cost-1",
                "attributes": {
                    "date": "2024-03-01T00:00:00Z",
                    "org_name": "Acme",
                    "public_id": "abc123",
                    "region": "us",
                    "charges": [
                        {"product_name": "infra_host", "charge_type": "total", "cost": 12.5}
                    ]
                }
            }]
        }))
        .unwrap();

        let report: EstimatedCostReport = wire.into();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].charges[0].cost, dec!(12.5));
        assert!(report.entries[0].charges[0].is_total());
    }

    #[test]
    fn test_billable_summary_skips_non_usage_bodies() {
        let wire: BillableSummaryResponse = serde_json::from_value(json!({
            "usage": [{
                "org_name": "Acme",
                "usage": {
                    "infra_host_sum": {
                        "account_billable_usage": 40,
                        "usage_unit": "hosts",
                        "billing_dimension": "infra_host"
                    },
                    "note": "not a body"
                }
            }]
        }))
        .unwrap();

        let summary: BillableSummary = wire.into();
        assert_eq!(summary.usage[0].usage.len(), 1);
        assert_eq!(summary.usage[0].lookup("infra_host"), Some((40, "hosts".into())));
    }
}
