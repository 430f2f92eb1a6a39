use crate::config::EngineOptions;
use crate::domain::retrospective::{
    classify_miss, retrospective_accuracy, MissEvidence, RetrospectiveAnalysis,
};
use crate::error::{idempotency_guard, EngineError};
use crate::feeds::types::PriceMovement;
use crate::feeds::{EntityExtractionClient, MarketDataClient};
use crate::storage;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub recorded: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// One retrospective pass over the movements the price feed has flagged
/// since the scan window opened. Duplicates are the normal consequence of
/// overlapping scan windows and are counted, not failed.
pub async fn run_retrospective_scan(
    pool: &PgPool,
    market: Arc<dyn MarketDataClient>,
    entities: Arc<dyn EntityExtractionClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<ScanSummary> {
    let since = now - Duration::hours(opts.movement_scan_hours);
    let movements = market
        .significant_movements(since, opts.materiality_percent)
        .await?;

    let mut summary = ScanSummary::default();
    for movement in movements {
        match analyze_movement(pool, market.as_ref(), entities.as_ref(), opts, &movement, now)
            .await
        {
            Ok(analysis) => {
                summary.recorded += 1;
                tracing::info!(
                    stock_symbol = %analysis.stock_symbol,
                    movement_percent = analysis.movement_percent,
                    missed = analysis.missed_opportunity,
                    "retrospective analysis recorded"
                );
            }
            Err(err) if idempotency_guard(&err).is_some() => {
                summary.duplicates += 1;
                tracing::debug!(
                    stock_symbol = %movement.stock_symbol,
                    "movement already analyzed; skipping"
                );
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(
                    stock_symbol = %movement.stock_symbol,
                    error = %err,
                    "retrospective analysis failed; continuing"
                );
            }
        }
    }

    Ok(summary)
}

/// Analyzes one significant movement: was it covered by any prediction, and
/// if not, why was it missed. Persists exactly one append-only record.
pub async fn analyze_movement(
    pool: &PgPool,
    market: &dyn MarketDataClient,
    entities: &dyn EntityExtractionClient,
    opts: &EngineOptions,
    movement: &PriceMovement,
    now: DateTime<Utc>,
) -> anyhow::Result<RetrospectiveAnalysis> {
    if movement.percent.abs() < opts.materiality_percent {
        return Err(EngineError::Validation(format!(
            "movement of {}% for {} is below the materiality threshold ({}%)",
            movement.percent, movement.stock_symbol, opts.materiality_percent
        ))
        .into());
    }

    let lookback_start = movement.start_time - Duration::hours(opts.lookback_hours);

    let existing_predictions_count = storage::predictions::count_created_in_window(
        pool,
        &movement.stock_symbol,
        lookback_start,
        movement.start_time,
    )
    .await?;

    // The news count is deliberately not symbol-filtered: the interesting
    // case is news that existed but was never linked to this symbol.
    let articles = market
        .articles_in_window(None, lookback_start, movement.start_time)
        .await?;
    let preceding_news_count = articles.len() as i64;

    let missed_opportunity = existing_predictions_count == 0;

    let (missed_reasons, accuracy) = if missed_opportunity {
        let mut stock_mention_found = false;
        for article in &articles {
            if entities
                .has_stock_mention(article.id, &movement.stock_symbol)
                .await?
            {
                stock_mention_found = true;
                break;
            }
        }
        let reason = classify_miss(MissEvidence {
            preceding_news_count,
            stock_mention_found,
        });
        (vec![reason.label().to_string()], 0.0)
    } else {
        let preceding = storage::predictions::preceding_predictions(
            pool,
            &movement.stock_symbol,
            lookback_start,
            movement.start_time,
        )
        .await?;
        (Vec::new(), retrospective_accuracy(movement.percent, &preceding))
    };

    let analysis = RetrospectiveAnalysis {
        id: Uuid::new_v4(),
        stock_symbol: movement.stock_symbol.clone(),
        movement_percent: movement.percent,
        analysis_date: movement.start_time.date_naive(),
        movement_start_time: movement.start_time,
        movement_end_time: movement.end_time,
        preceding_news_count,
        existing_predictions_count,
        missed_opportunity,
        missed_reasons,
        retrospective_accuracy: accuracy,
        created_at: now,
    };

    storage::retrospectives::insert(pool, &analysis).await?;
    Ok(analysis)
}
