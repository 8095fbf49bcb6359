//! Costline - reconcile provider usage into priced cost line items
//!
//! Usage: `costline [START END [hourly|daily]]`
//!
//! START and END are RFC 3339 timestamps or `YYYY-MM-DD` dates. Without them
//! the previous UTC day is reconciled. Settings come from the file named by
//! `COSTLINE_CONFIG` and `COSTLINE__*` environment variables.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use costline_common::{CostRequest, Resolution, VERSION};
use costline_reconcile::client::DatadogClient;
use costline_reconcile::config::{Settings, CONFIG_PATH_ENV};
use costline_reconcile::metrics::PipelineMetrics;
use costline_reconcile::Reconciler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var(CONFIG_PATH_ENV).ok();
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    settings.require_credentials()?;
    let request = parse_request(std::env::args().skip(1).collect())?;
    tracing::info!(
        version = VERSION,
        start = %request.start,
        end = %request.end,
        resolution = %request.resolution,
        "Starting Costline reconciliation"
    );

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(PipelineMetrics::new()?);
    metrics.register(&registry)?;

    let client = DatadogClient::new(&settings.provider)?;
    let reconciler = Reconciler::new(Arc::new(client), &settings, metrics.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling pending waits...");
            on_signal.cancel();
        }
    });

    let responses = reconciler.get_costs(&request, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&responses)?);

    tracing::info!(
        windows = responses.len(),
        pages = metrics.pages_fetched.get(),
        retries = metrics.request_retries.get(),
        items = metrics.line_items_emitted.get(),
        errors = metrics.window_errors.get(),
        "Costline reconciliation finished"
    );
    Ok(())
}

fn parse_request(args: Vec<String>) -> anyhow::Result<CostRequest> {
    match args.as_slice() {
        [] => {
            let end = midnight(Utc::now().date_naive());
            Ok(CostRequest::new(end - Duration::days(1), end, Resolution::Daily))
        }
        [start, end] => Ok(CostRequest::new(parse_time(start)?, parse_time(end)?, Resolution::Daily)),
        [start, end, resolution] => {
            let resolution = match resolution.as_str() {
                "hourly" => Resolution::Hourly,
                "daily" => Resolution::Daily,
                other => bail!("unknown resolution {:?}, expected hourly or daily", other),
            };
            Ok(CostRequest::new(parse_time(start)?, parse_time(end)?, resolution))
        }
        _ => bail!("usage: costline [START END [hourly|daily]]"),
    }
}

fn parse_time(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid time {:?}", value))?;
    Ok(midnight(date))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_request_with_dates() {
        let request = parse_request(vec!["2024-03-11".into(), "2024-03-12T00:00:00Z".into(), "hourly".into()]).unwrap();
        assert_eq!(request.start, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(request.end, Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap());
        assert_eq!(request.resolution, Resolution::Hourly);
    }

    #[test]
    fn test_parse_request_defaults_to_previous_day() {
        let request = parse_request(Vec::new()).unwrap();
        assert_eq!(request.end - request.start, Duration::days(1));
        assert_eq!(request.resolution, Resolution::Daily);
    }

    #[test]
    fn test_parse_request_rejects_bad_input() {
        assert!(parse_request(vec!["yesterday".into(), "today".into()]).is_err());
        assert!(parse_request(vec!["2024-03-11".into(), "2024-03-12".into(), "weekly".into()]).is_err());
        assert!(parse_request(vec!["2024-03-11".into()]).is_err());
    }
}
