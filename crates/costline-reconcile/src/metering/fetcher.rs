//! Rate-limited usage fetcher
//!
//! Pages through the provider's hourly usage listing for one window. Every
//! request first takes a token from the shared [`RateLimiter`], and transient
//! failures are retried with a fixed delay. Terminal failures end paging for the
//! window but never discard records that were already fetched.

use costline_common::{ProviderError, UsageRecord, Window};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::limiter::RateLimiter;
use crate::client::UsageApi;
use crate::metrics::PipelineMetrics;

/// Fixed-delay retry policy for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(30),
        }
    }
}

/// Result of fetching one window
#[derive(Debug, Default)]
pub struct WindowFetch {
    /// Records of every page fetched, in page order
    pub records: Vec<UsageRecord>,
    /// Errors to report on the window
    pub errors: Vec<String>,
    /// Fetching stopped because a limiter wait failed
    pub aborted: bool,
    /// Pages successfully fetched
    pub pages: usize,
}

/// Paginating, rate-limited reader of provider usage
pub struct RateLimitedFetcher {
    api: Arc<dyn UsageApi>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl RateLimitedFetcher {
    pub fn new(
        api: Arc<dyn UsageApi>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            api,
            limiter,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
            metrics,
        }
    }

    /// Provider client behind this fetcher
    pub fn api(&self) -> &dyn UsageApi {
        self.api.as_ref()
    }

    /// Run one provider call under the rate limit, retrying transient failures.
    ///
    /// A token is taken before every attempt. A failed limiter wait is returned
    /// at once and never retried.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            self.limiter.acquire(1, cancel).await?;

            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = self.retry.delay.as_secs(),
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    self.metrics.request_retries.inc();
                    attempt += 1;
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch every usage page of `window`
    #[instrument(skip(self, cancel), fields(window = %window))]
    pub async fn fetch(&self, window: &Window, cancel: &CancellationToken) -> WindowFetch {
        let mut fetched = WindowFetch::default();
        let mut cursor: Option<String> = None;

        loop {
            let result = self
                .call_with_retry("hourly_usage", cancel, || {
                    self.api.hourly_usage(window, cursor.as_deref())
                })
                .await;

            match result {
                Ok(page) => {
                    fetched.pages += 1;
                    self.metrics.pages_fetched.inc();
                    debug!(
                        page = fetched.pages,
                        records = page.records.len(),
                        has_next = page.next_cursor.is_some(),
                        "Fetched usage page"
                    );
                    fetched.records.extend(page.records);
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(err @ ProviderError::RateLimiterAborted(_)) => {
                    warn!(error = %err, "Rate limiter wait failed, abandoning window fetch");
                    fetched.errors.push(format!("error waiting on rate limiter: {}", err));
                    fetched.aborted = true;
                    break;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        kept_records = fetched.records.len(),
                        "Usage fetch failed, keeping partial data"
                    );
                    fetched.errors.push(format!("error fetching hourly usage: {}", err));
                    break;
                }
            }
        }

        fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use costline_common::{BillableSummary, EstimatedCostReport, Resolution, UsagePage};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Usage API that replays scripted pages
    #[derive(Default)]
    struct ScriptedApi {
        pages: Mutex<VecDeque<Result<UsagePage, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(pages: Vec<Result<UsagePage, ProviderError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UsageApi for ScriptedApi {
        async fn hourly_usage(
            &self,
            _window: &Window,
            _cursor: Option<&str>,
        ) -> Result<UsagePage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(UsagePage::default()))
        }

        async fn estimated_costs(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<EstimatedCostReport, ProviderError> {
            Ok(EstimatedCostReport::default())
        }

        async fn billable_summary(&self, _month: NaiveDate) -> Result<BillableSummary, ProviderError> {
            Ok(BillableSummary::default())
        }

        async fn pricing_page(&self, _url: &str) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    fn record(id: &str) -> UsageRecord {
        UsageRecord::new(id, "abc123", "infra_hosts").with_measurement("host_count", dec!(1))
    }

    fn window() -> Window {
        Window::new(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap(), Resolution::Daily)
    }

    fn fetcher(api: Arc<ScriptedApi>) -> (RateLimitedFetcher, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let fetcher = RateLimitedFetcher::new(
            api,
            Arc::new(RateLimiter::new(1000.0, 10)),
            RetryPolicy::default(),
            metrics.clone(),
        );
        (fetcher, metrics)
    }

    #[tokio::test]
    async fn test_fetch_follows_cursor() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(UsagePage::with_cursor(vec![record("r1"), record("r2")], "next")),
            Ok(UsagePage::last(vec![record("r3")])),
        ]));
        let (fetcher, metrics) = fetcher(api.clone());

        let fetched = fetcher.fetch(&window(), &CancellationToken::new()).await;

        assert_eq!(fetched.records.len(), 3);
        assert_eq!(fetched.pages, 2);
        assert!(fetched.errors.is_empty());
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.pages_fetched.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_page_is_retried_after_delay() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ProviderError::Throttled("slow down".into())),
            Ok(UsagePage::last(vec![record("r1")])),
        ]));
        let (fetcher, metrics) = fetcher(api.clone());
        let start = Instant::now();

        let fetched = fetcher.fetch(&window(), &CancellationToken::new()).await;

        assert_eq!(fetched.records.len(), 1);
        assert!(fetched.errors.is_empty());
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.request_retries.get(), 1);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let api = Arc::new(ScriptedApi::new(
            (0..10)
                .map(|_| Err(ProviderError::from_status(503, "unavailable")))
                .collect(),
        ));
        let (fetcher, _) = fetcher(api.clone());

        let fetched = fetcher.fetch(&window(), &CancellationToken::new()).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
        assert_eq!(fetched.errors.len(), 1);
        assert!(!fetched.aborted);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let api = Arc::new(ScriptedApi::new(vec![Err(ProviderError::from_status(
            403,
            "forbidden",
        ))]));
        let (fetcher, metrics) = fetcher(api.clone());

        let fetched = fetcher.fetch(&window(), &CancellationToken::new()).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetched.errors.len(), 1);
        assert!(fetched.errors[0].contains("403"));
        assert_eq!(metrics.request_retries.get(), 0);
    }

    #[tokio::test]
    async fn test_partial_data_is_kept() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(UsagePage::with_cursor(vec![record("r1")], "next")),
            Err(ProviderError::Malformed("unexpected end of input".into())),
        ]));
        let (fetcher, _) = fetcher(api);

        let fetched = fetcher.fetch(&window(), &CancellationToken::new()).await;

        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_limiter_aborts_window() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(UsagePage::last(vec![record("r1")]))]));
        let (fetcher, _) = fetcher(api.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetched = fetcher.fetch(&window(), &cancel).await;

        assert!(fetched.aborted);
        assert!(fetched.records.is_empty());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }
}
