use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use newsgauge_core::config::{EngineOptions, Settings};
use newsgauge_core::domain::pattern::Pattern;
use newsgauge_core::domain::prediction::{Impact, Prediction, PredictionDraft};
use newsgauge_core::domain::report::DailyReport;
use newsgauge_core::domain::retrospective::RetrospectiveAnalysis;
use newsgauge_core::domain::rule::Rule;
use newsgauge_core::error::EngineError;
use newsgauge_core::feeds::http::{HttpEntityExtractionClient, HttpMarketDataClient};
use newsgauge_core::feeds::types::PriceMovement;
use newsgauge_core::feeds::{EntityExtractionClient, MarketDataClient};
use newsgauge_core::storage::predictions::AccuracyStats;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match newsgauge_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    // Feed collaborators are optional: read paths work without them, and the
    // routes that need them answer 503 until they are configured.
    let market: Option<Arc<dyn MarketDataClient>> =
        match HttpMarketDataClient::from_settings(&settings) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "market data feed not configured");
                None
            }
        };
    let entities: Option<Arc<dyn EntityExtractionClient>> =
        match HttpEntityExtractionClient::from_settings(&settings) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "entity extraction feed not configured");
                None
            }
        };

    let state = AppState {
        pool,
        market,
        entities,
        opts: EngineOptions::from_env(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/predictions", post(record_prediction))
        .route("/predictions/:id/evaluation", post(evaluate_prediction))
        .route("/rules/:rule_type/:rule_value", get(get_rule))
        .route("/patterns/:pattern_type", get(get_patterns_by_type))
        .route("/reports/:date", get(get_report_by_date).post(compile_report))
        .route("/retrospectives", post(run_retrospective_scan))
        .route("/stats/accuracy", get(get_accuracy_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    market: Option<Arc<dyn MarketDataClient>>,
    entities: Option<Arc<dyn EntityExtractionClient>>,
    opts: EngineOptions,
}

fn error_status(err: anyhow::Error) -> StatusCode {
    let status = match err.downcast_ref::<EngineError>() {
        Some(EngineError::Validation(_)) | Some(EngineError::InvalidTimeWindow { .. }) => {
            StatusCode::BAD_REQUEST
        }
        Some(EngineError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(e) if e.is_idempotency_guard() => StatusCode::CONFLICT,
        Some(EngineError::AggregateUpdateConflict { .. })
        | Some(EngineError::TransientFailure { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "request failed");
    }
    status
}

#[derive(Debug, Serialize)]
struct RecordedPrediction {
    id: Uuid,
}

async fn record_prediction(
    State(state): State<AppState>,
    Json(draft): Json<PredictionDraft>,
) -> Result<Json<RecordedPrediction>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let id = newsgauge_core::storage::predictions::record(pool, &draft, Utc::now())
        .await
        .map_err(error_status)?;

    Ok(Json(RecordedPrediction { id }))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    actual_impact: Impact,
    actual_change_percent: f64,
}

async fn evaluate_prediction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<Prediction>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let prediction = newsgauge_core::engine::evaluator::evaluate_prediction(
        pool,
        &state.opts,
        id,
        req.actual_impact,
        req.actual_change_percent,
        Utc::now(),
    )
    .await
    .map_err(error_status)?;

    Ok(Json(prediction))
}

async fn get_rule(
    State(state): State<AppState>,
    Path((rule_type, rule_value)): Path<(String, String)>,
) -> Result<Json<Rule>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let rule = newsgauge_core::storage::rules::get(pool, &rule_type, &rule_value)
        .await
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(rule))
}

async fn get_patterns_by_type(
    State(state): State<AppState>,
    Path(pattern_type): Path<String>,
) -> Result<Json<Vec<Pattern>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let patterns = newsgauge_core::storage::patterns::get_by_type(
        pool,
        &pattern_type,
        state.opts.min_pattern_samples,
    )
    .await
    .map_err(error_status)?;

    Ok(Json(patterns))
}

async fn get_report_by_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DailyReport>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let report_date =
        NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let report = newsgauge_core::storage::reports::get_by_date(pool, report_date)
        .await
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(report))
}

async fn compile_report(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DailyReport>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let Some(market) = &state.market else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let report_date =
        NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let report = newsgauge_core::engine::report::compile_daily_report(
        pool,
        market.as_ref(),
        &state.opts,
        report_date,
        Utc::now(),
    )
    .await
    .map_err(error_status)?;

    Ok(Json(report))
}

async fn run_retrospective_scan(
    State(state): State<AppState>,
    Json(movement): Json<PriceMovement>,
) -> Result<Json<RetrospectiveAnalysis>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let (Some(market), Some(entities)) = (&state.market, &state.entities) else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let analysis = newsgauge_core::engine::retrospective::analyze_movement(
        pool,
        market.as_ref(),
        entities.as_ref(),
        &state.opts,
        &movement,
        Utc::now(),
    )
    .await
    .map_err(error_status)?;

    Ok(Json(analysis))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    symbol: Option<String>,
}

async fn get_accuracy_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<AccuracyStats>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let stats =
        newsgauge_core::storage::predictions::accuracy_stats(pool, query.symbol.as_deref())
            .await
            .map_err(error_status)?;

    Ok(Json(stats))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
