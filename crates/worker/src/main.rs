use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use newsgauge_core::config::{EngineOptions, Settings};
use newsgauge_core::error::idempotency_guard;
use newsgauge_core::feeds::http::{HttpEntityExtractionClient, HttpMarketDataClient};
use newsgauge_core::feeds::{EntityExtractionClient, MarketDataClient};
use newsgauge_core::storage::lock::Job;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Parser)]
#[command(name = "newsgauge_worker")]
struct Args {
    /// Run each job once and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Seconds between scheduled passes.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    interval_secs: u64,

    /// Compile the report for this date (YYYY-MM-DD) and exit.
    #[arg(long)]
    report_date: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let opts = EngineOptions::from_env();

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    newsgauge_core::storage::migrate(&pool).await?;

    let market: Arc<dyn MarketDataClient> =
        Arc::new(HttpMarketDataClient::from_settings(&settings)?);
    let entities: Arc<dyn EntityExtractionClient> =
        Arc::new(HttpEntityExtractionClient::from_settings(&settings)?);

    if let Some(date) = args.report_date.as_deref() {
        let report_date = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
        let report = newsgauge_core::engine::report::compile_daily_report(
            &pool,
            market.as_ref(),
            &opts,
            report_date,
            Utc::now(),
        )
        .await?;
        tracing::info!(
            %report_date,
            total_predictions = report.total_predictions,
            "report compiled; exiting"
        );
        return Ok(());
    }

    if args.once {
        run_all_jobs(&pool, &market, &entities, &opts, Utc::now()).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(args.interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(interval_secs = args.interval_secs, "worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_all_jobs(&pool, &market, &entities, &opts, Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received; exiting");
                return Ok(());
            }
        }
    }
}

// Each job is guarded by its own advisory lock: if the previous run of the
// same job is still in flight, this tick skips it rather than queueing.
async fn run_all_jobs(
    pool: &sqlx::PgPool,
    market: &Arc<dyn MarketDataClient>,
    entities: &Arc<dyn EntityExtractionClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) {
    if let Err(err) = run_evaluation_job(pool, market, opts, now).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "evaluation job failed");
    }
    if let Err(err) = run_retrospective_job(pool, market, entities, opts, now).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "retrospective job failed");
    }
    if let Err(err) = run_report_job(pool, market, opts, now).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "daily report job failed");
    }
}

async fn run_evaluation_job(
    pool: &sqlx::PgPool,
    market: &Arc<dyn MarketDataClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let acquired =
        newsgauge_core::storage::lock::try_acquire_job_lock(pool, Job::Evaluation).await?;
    if !acquired {
        tracing::warn!(job = Job::Evaluation.name(), "previous run still in flight; skipping");
        return Ok(());
    }

    let result = newsgauge_core::engine::evaluator::run_evaluation_pass(
        pool,
        Arc::clone(market),
        opts,
        now,
    )
    .await;

    let _ = newsgauge_core::storage::lock::release_job_lock(pool, Job::Evaluation).await;

    let summary = result?;
    tracing::info!(
        evaluated = summary.evaluated,
        healed = summary.healed,
        failed = summary.failed,
        "evaluation pass finished"
    );
    Ok(())
}

async fn run_retrospective_job(
    pool: &sqlx::PgPool,
    market: &Arc<dyn MarketDataClient>,
    entities: &Arc<dyn EntityExtractionClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let acquired =
        newsgauge_core::storage::lock::try_acquire_job_lock(pool, Job::RetrospectiveScan).await?;
    if !acquired {
        tracing::warn!(
            job = Job::RetrospectiveScan.name(),
            "previous run still in flight; skipping"
        );
        return Ok(());
    }

    let result = newsgauge_core::engine::retrospective::run_retrospective_scan(
        pool,
        Arc::clone(market),
        Arc::clone(entities),
        opts,
        now,
    )
    .await;

    let _ = newsgauge_core::storage::lock::release_job_lock(pool, Job::RetrospectiveScan).await;

    let summary = result?;
    tracing::info!(
        recorded = summary.recorded,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "retrospective scan finished"
    );
    Ok(())
}

// Compiles yesterday's report once its window has closed. An existing
// report makes this a no-op.
async fn run_report_job(
    pool: &sqlx::PgPool,
    market: &Arc<dyn MarketDataClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let report_date = now.date_naive() - chrono::Duration::days(1);

    if newsgauge_core::storage::reports::get_by_date(pool, report_date)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let acquired =
        newsgauge_core::storage::lock::try_acquire_job_lock(pool, Job::DailyReport).await?;
    if !acquired {
        tracing::warn!(job = Job::DailyReport.name(), "previous run still in flight; skipping");
        return Ok(());
    }

    let result = newsgauge_core::engine::report::compile_daily_report(
        pool,
        market.as_ref(),
        opts,
        report_date,
        now,
    )
    .await;

    let _ = newsgauge_core::storage::lock::release_job_lock(pool, Job::DailyReport).await;

    match result {
        Ok(report) => {
            tracing::info!(
                %report_date,
                total_predictions = report.total_predictions,
                "daily report compiled"
            );
            Ok(())
        }
        // Lost a race with another compiler; the stored report wins.
        Err(err) if idempotency_guard(&err).is_some() => {
            tracing::debug!(%report_date, "report already exists; skipping");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
