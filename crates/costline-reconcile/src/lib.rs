//! # Costline Reconcile
//!
//! Usage reconciliation and pricing attribution for metered providers.
//!
//! ## Pipeline
//!
//! ```text
//! Fetcher -> Normalizer -> PriceCatalog -> Assembler -> PostProcessor -> WindowResponse
//! ```
//!
//! Where:
//! - Fetcher: paginated, rate-limited reads of hourly usage
//! - Normalizer: rate dimensions pass through, cumulative ones become deltas
//! - PriceCatalog: built once per invocation, resolves dimensions to prices
//! - Assembler: one line item per `<resource id>/<dimension>` per window
//! - PostProcessor: split, overlap, allowance and pruning passes
//!
//! The provider's own estimated cost is attached per window as `billing` items.

pub mod billing;
pub mod client;
pub mod config;
pub mod metering;
pub mod metrics;
pub mod pricing;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use costline_common::{
    CostLineItem, CostRequest, ResponseTags, Result, UsageRecord, Window, WindowResponse,
    ESTIMATE_DELAY_HOURS,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use billing::{CostAssembler, PostProcessor};
use client::UsageApi;
use config::{CatalogSource, Settings};
use metering::{PriorReadings, RateLimitedFetcher, RateLimiter, UsageNormalizer};
use metrics::PipelineMetrics;
use pricing::{CatalogConfig, PriceCatalog, PriceListing};

/// Domain tag of every response
pub const DOMAIN: &str = "datadog";

/// Runs cost requests against one provider account
pub struct Reconciler {
    fetcher: RateLimitedFetcher,
    normalizer: UsageNormalizer,
    postprocessor: PostProcessor,
    catalog_source: CatalogSource,
    marketplace_url: String,
    catalog_config: CatalogConfig,
    seed_prior_window: bool,
    tags: ResponseTags,
    metrics: Arc<PipelineMetrics>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn UsageApi>, settings: &Settings, metrics: Arc<PipelineMetrics>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            settings.rate_limit.refill_per_sec,
            settings.rate_limit.burst,
        ));
        Self {
            fetcher: RateLimitedFetcher::new(api, limiter, settings.retry.policy(), metrics.clone()),
            normalizer: UsageNormalizer::new(),
            postprocessor: PostProcessor::new(settings.postprocess.clone()),
            catalog_source: settings.catalog.source,
            marketplace_url: settings.catalog.marketplace_url.clone(),
            catalog_config: settings.catalog.tables.clone(),
            seed_prior_window: settings.seed_prior_window,
            tags: ResponseTags::observability(DOMAIN),
            metrics,
        }
    }

    /// Costs of every non-future window of `request`, one response per window.
    ///
    /// Failures are reported inside the responses. When the request cannot be
    /// split or no catalog can be built, a single error-only response is returned.
    #[instrument(skip(self, cancel), fields(start = %request.start, end = %request.end, resolution = %request.resolution))]
    pub async fn get_costs(
        &self,
        request: &CostRequest,
        cancel: &CancellationToken,
    ) -> Vec<WindowResponse> {
        let windows = match Window::split(request.start, request.end, request.resolution) {
            Ok(windows) => windows,
            Err(err) => {
                warn!(error = %err, "Unable to split request into windows");
                return vec![self.error_response(format!("error getting windows: {}", err))];
            }
        };

        let catalog = match self.build_catalog(cancel).await {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "Unable to build price catalog");
                return vec![self.error_response(format!("error building price catalog: {}", err))];
            }
        };
        info!(entries = catalog.len(), windows = windows.len(), "Price catalog ready");

        let now = Utc::now();
        let mut priors = PriorReadings::new();
        let mut seed_errors = Vec::new();
        if self.seed_prior_window {
            if let Some(first) = windows.first().filter(|w| !w.is_future(now)) {
                seed_errors = self.seed_priors(&first.previous(), &catalog, &mut priors, cancel).await;
            }
        }

        let mut responses = Vec::with_capacity(windows.len());
        for window in &windows {
            if window.is_future(now) {
                debug!(window = %window, "Skipping window in the future");
                continue;
            }
            let mut response = self.window_costs(window, &catalog, &mut priors, cancel).await;
            if responses.is_empty() && !seed_errors.is_empty() {
                let mut errors = std::mem::take(&mut seed_errors);
                errors.append(&mut response.errors);
                response.errors = errors;
            }
            self.metrics.window_errors.inc_by(response.errors.len() as u64);
            responses.push(response);
        }
        responses
    }

    /// Build the price catalog from the configured source
    pub async fn build_catalog(&self, cancel: &CancellationToken) -> Result<PriceCatalog> {
        let api = self.fetcher.api();
        let listing = match self.catalog_source {
            CatalogSource::Marketplace => {
                let url = self.marketplace_url.as_str();
                let html = self
                    .fetcher
                    .call_with_retry("pricing_page", cancel, || api.pricing_page(url))
                    .await?;
                PriceListing::from_marketplace_page(&html)?
            }
            CatalogSource::BillableUsage => {
                let (month, end) = stable_billing_period(Utc::now().date_naive());
                let summary = self
                    .fetcher
                    .call_with_retry("billable_summary", cancel, || api.billable_summary(month))
                    .await?;
                let report = self
                    .fetcher
                    .call_with_retry("estimated_costs", cancel, || api.estimated_costs(month, end))
                    .await?;
                PriceListing::from_billable_usage(&summary, &report)?
            }
        };

        if listing.details.is_empty() {
            warn!("Price listing is empty, every dimension will be unpriced");
        }
        Ok(PriceCatalog::build(&listing, self.catalog_config.clone()))
    }

    /// Record the cumulative readings of `window` without producing costs
    async fn seed_priors(
        &self,
        window: &Window,
        catalog: &PriceCatalog,
        priors: &mut PriorReadings,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let mut fetched = self.fetcher.fetch(window, cancel).await;
        sort_by_timestamp(&mut fetched.records);

        for record in &fetched.records {
            for measurement in &record.measurements {
                let Some(value) = measurement.value else { continue };
                if !catalog.resolve(&measurement.usage_type, &record.product_family).rate {
                    priors.record(&record.public_id, &measurement.usage_type, value);
                }
            }
        }

        debug!(window = %window, readings = priors.len(), "Seeded prior readings");
        fetched
            .errors
            .into_iter()
            .map(|err| format!("seeding prior window {}: {}", window, err))
            .collect()
    }

    #[instrument(skip_all, fields(window = %window))]
    async fn window_costs(
        &self,
        window: &Window,
        catalog: &PriceCatalog,
        priors: &mut PriorReadings,
        cancel: &CancellationToken,
    ) -> WindowResponse {
        let mut response = WindowResponse::for_window(&self.tags, window);
        if let Some(currency) = catalog.currency() {
            response.currency = currency.to_string();
        }

        let mut fetched = self.fetcher.fetch(window, cancel).await;
        response.errors.append(&mut fetched.errors);
        if fetched.aborted {
            return response;
        }
        sort_by_timestamp(&mut fetched.records);

        let mut assembler = CostAssembler::new();
        for record in &fetched.records {
            for measurement in &record.measurements {
                let dimension = measurement.usage_type.as_str();
                let Some(current) = measurement.value else { continue };

                let resolution = catalog.resolve(dimension, &record.product_family);
                let prior = if resolution.rate {
                    None
                } else {
                    priors.record(&record.public_id, dimension, current)
                };

                let normalized = self.normalizer.normalize(dimension, current, prior, resolution.rate);
                if let Some(warning) = &normalized.warning {
                    warn!(resource_id = %record.public_id, dimension, %warning, "Approximated cumulative usage");
                }
                if !normalized.is_billable() {
                    continue;
                }
                if !resolution.is_matched() {
                    self.metrics.unmatched_dimensions.inc();
                }
                debug!(dimension, key = %resolution.key, step = %resolution.step, "Resolved usage dimension");
                assembler.assemble(record, dimension, normalized.quantity, &resolution);
            }
        }

        let mut costs = self.postprocessor.run(assembler.finish());
        costs.extend(self.billing_items(window, cancel, &mut response.errors).await);

        self.metrics.line_items_emitted.inc_by(costs.len() as u64);
        info!(
            records = fetched.records.len(),
            items = costs.len(),
            errors = response.errors.len(),
            "Window reconciled"
        );
        response.costs = costs;
        response
    }

    /// Billing items from the month-to-date estimate up to the window's end
    async fn billing_items(
        &self,
        window: &Window,
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
    ) -> Vec<CostLineItem> {
        let start = first_of_month(window.start().date_naive());
        let end = window.end().date_naive();
        let api = self.fetcher.api();

        match self
            .fetcher
            .call_with_retry("estimated_costs", cancel, || api.estimated_costs(start, end))
            .await
        {
            Ok(report) => CostAssembler::assemble_billing(&report, window),
            Err(err) => {
                warn!(error = %err, "Unable to fetch estimated costs");
                errors.push(format!("error fetching estimated costs: {}", err));
                Vec::new()
            }
        }
    }

    fn error_response(&self, error: String) -> WindowResponse {
        self.metrics.window_errors.inc();
        WindowResponse::error_only(&self.tags, error)
    }
}

fn sort_by_timestamp(records: &mut [UsageRecord]) {
    records.sort_by_key(|record| record.timestamp);
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Month whose estimate has settled, and the last date to query within it
fn stable_billing_period(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let stable = today - Duration::hours(ESTIMATE_DELAY_HOURS);
    let month = first_of_month(stable);
    let next_month = if month.month() == 12 {
        NaiveDate::from_ymd_opt(month.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(month.year(), month.month() + 1, 1)
    }
    .unwrap_or(month);

    let end = if today < next_month { stable } else { next_month };
    (month, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_stable_period_mid_month() {
        assert_eq!(
            stable_billing_period(date(2024, 3, 20)),
            (date(2024, 3, 1), date(2024, 3, 17))
        );
    }

    #[test]
    fn test_stable_period_early_month_uses_previous_month() {
        assert_eq!(
            stable_billing_period(date(2024, 1, 2)),
            (date(2023, 12, 1), date(2024, 1, 1))
        );
    }

    #[test]
    fn test_first_of_month() {
        assert_eq!(first_of_month(date(2024, 2, 29)), date(2024, 2, 1));
    }
}
