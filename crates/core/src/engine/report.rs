use crate::config::EngineOptions;
use crate::domain::pattern::PATTERN_TYPE_PREDICTION_OUTCOME;
use crate::domain::report::{build_daily_report, DailyReport};
use crate::error::EngineError;
use crate::feeds::MarketDataClient;
use crate::storage;
use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;

/// Compiles and persists the report for one calendar date, over the closed
/// window [00:00, 24:00) UTC. Write-once: a second attempt for the same
/// date fails with ReportAlreadyExists and leaves the stored report intact.
pub async fn compile_daily_report(
    pool: &PgPool,
    market: &dyn MarketDataClient,
    opts: &EngineOptions,
    report_date: NaiveDate,
    now: DateTime<Utc>,
) -> anyhow::Result<DailyReport> {
    if storage::reports::get_by_date(pool, report_date).await?.is_some() {
        return Err(EngineError::ReportAlreadyExists { report_date }.into());
    }

    let start = report_date
        .and_hms_opt(0, 0, 0)
        .context("invalid report date")?
        .and_utc();
    let end = start + Duration::days(1);

    let articles = market.articles_in_window(None, start, end).await?;
    let evaluated = storage::predictions::evaluated_in_window(pool, start, end).await?;
    let rules = storage::rules::list(pool).await?;
    let patterns = storage::patterns::get_by_type(
        pool,
        PATTERN_TYPE_PREDICTION_OUTCOME,
        opts.min_pattern_samples,
    )
    .await?;

    let report = build_daily_report(
        report_date,
        articles.len() as i64,
        &evaluated,
        &rules,
        &patterns,
        opts,
    );

    storage::reports::insert(pool, &report, now).await?;

    tracing::info!(
        %report_date,
        total_articles = report.total_articles,
        total_predictions = report.total_predictions,
        "daily report compiled"
    );

    Ok(report)
}
