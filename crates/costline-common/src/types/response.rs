//! Cost requests and per-window responses exchanged with the host

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::line_item::CostLineItem;
use super::window::{Resolution, Window};

/// Request for costs over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
}

impl CostRequest {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, resolution: Resolution) -> Self {
        Self {
            start,
            end,
            resolution,
        }
    }
}

/// Tags stamped onto every response of one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTags {
    pub domain: String,
    pub cost_source: String,
    pub version: String,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
}

impl ResponseTags {
    /// Tags of the observability provider
    pub fn observability(domain: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("api_client_version".to_string(), "v2".to_string());
        Self {
            domain: domain.into(),
            cost_source: "observability".to_string(),
            version: "v1".to_string(),
            currency: "USD".to_string(),
            metadata,
        }
    }
}

/// Costs for one window
///
/// Errors are reported as strings alongside whatever line items could be
/// produced; a response is never withheld because part of it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResponse {
    pub domain: String,
    pub cost_source: String,
    pub version: String,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub costs: Vec<CostLineItem>,
}

impl WindowResponse {
    /// Empty response for `window`
    pub fn for_window(tags: &ResponseTags, window: &Window) -> Self {
        Self {
            domain: tags.domain.clone(),
            cost_source: tags.cost_source.clone(),
            version: tags.version.clone(),
            currency: tags.currency.clone(),
            metadata: tags.metadata.clone(),
            start: Some(window.start()),
            end: Some(window.end()),
            errors: Vec::new(),
            costs: Vec::new(),
        }
    }

    /// Response carrying only an error, for failures before any window exists
    pub fn error_only(tags: &ResponseTags, error: impl Into<String>) -> Self {
        Self {
            domain: tags.domain.clone(),
            cost_source: tags.cost_source.clone(),
            version: tags.version.clone(),
            currency: tags.currency.clone(),
            metadata: tags.metadata.clone(),
            start: None,
            end: None,
            errors: vec![error.into()],
            costs: Vec::new(),
        }
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_response_boilerplate() {
        let tags = ResponseTags::observability("datadog");
        let window = Window::new(
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap(),
            Resolution::Daily,
        );
        let response = WindowResponse::for_window(&tags, &window);

        assert_eq!(response.domain, "datadog");
        assert_eq!(response.cost_source, "observability");
        assert_eq!(response.currency, "USD");
        assert_eq!(response.metadata.get("api_client_version").unwrap(), "v2");
        assert_eq!(response.end, Some(window.end()));
        assert!(response.is_ok());
    }

    #[test]
    fn test_error_only_response() {
        let tags = ResponseTags::observability("datadog");
        let response = WindowResponse::error_only(&tags, "error getting windows");
        assert!(!response.is_ok());
        assert!(response.start.is_none());
        assert!(response.costs.is_empty());
    }
}
