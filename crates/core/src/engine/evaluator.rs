use crate::config::EngineOptions;
use crate::domain::pattern::{PatternData, PATTERN_TYPE_PREDICTION_OUTCOME};
use crate::domain::prediction::{score_accuracy, Evaluation, Impact, Prediction};
use crate::domain::rule::RuleKey;
use crate::error::EngineError;
use crate::feeds::MarketDataClient;
use crate::storage;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    pub evaluated: usize,
    /// Interrupted aggregate updates finished by this pass.
    pub healed: usize,
    pub failed: usize,
}

/// One evaluation pass: finish any interrupted aggregate updates first, then
/// evaluate everything due. Distinct symbols run concurrently; a single
/// prediction's failure never aborts the batch.
pub async fn run_evaluation_pass(
    pool: &PgPool,
    market: Arc<dyn MarketDataClient>,
    opts: &EngineOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<PassSummary> {
    let mut summary = PassSummary::default();

    for prediction in storage::predictions::find_unapplied(pool).await? {
        match heal_aggregates(pool, opts, &prediction, now).await {
            Ok(()) => summary.healed += 1,
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(
                    prediction_id = %prediction.id,
                    error = %err,
                    "aggregate heal failed; will retry next pass"
                );
            }
        }
    }

    let due = storage::predictions::find_due(pool, now).await?;
    let mut by_symbol: BTreeMap<String, Vec<Prediction>> = BTreeMap::new();
    for prediction in due {
        by_symbol
            .entry(prediction.stock_symbol.clone())
            .or_default()
            .push(prediction);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for (symbol, group) in by_symbol {
        let pool = pool.clone();
        let market = Arc::clone(&market);
        let opts = opts.clone();
        tasks.spawn(async move {
            let mut evaluated = 0usize;
            let mut failed = 0usize;
            for prediction in group {
                match evaluate_due_prediction(&pool, market.as_ref(), &opts, &prediction, now)
                    .await
                {
                    Ok(()) => evaluated += 1,
                    Err(err) => {
                        failed += 1;
                        tracing::warn!(
                            %symbol,
                            prediction_id = %prediction.id,
                            error = %err,
                            "evaluation failed; continuing with remaining predictions"
                        );
                    }
                }
            }
            (evaluated, failed)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((evaluated, failed)) => {
                summary.evaluated += evaluated;
                summary.failed += failed;
            }
            Err(err) => {
                summary.failed += 1;
                tracing::error!(error = %err, "evaluation task aborted");
            }
        }
    }

    Ok(summary)
}

async fn evaluate_due_prediction(
    pool: &PgPool,
    market: &dyn MarketDataClient,
    opts: &EngineOptions,
    prediction: &Prediction,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let actual_change_percent = market
        .price_change_percent(&prediction.stock_symbol, prediction.created_at, prediction.due_at)
        .await
        .with_context(|| format!("price fetch failed for {}", prediction.stock_symbol))?;

    let actual_impact = Impact::from_change_percent(actual_change_percent, opts.flat_band_percent);
    let accuracy = score_accuracy(
        prediction.predicted_impact,
        prediction.predicted_change_percent,
        actual_impact,
        actual_change_percent,
    );

    let evaluation = Evaluation {
        actual_impact,
        actual_change_percent,
        accuracy,
        evaluated_at: now,
    };

    if let Err(err) = storage::predictions::mark_evaluated(pool, prediction.id, &evaluation).await
    {
        // A concurrent evaluation won the transition; its aggregates (or the
        // healer) own the rest of this unit of work.
        if matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::AlreadyEvaluated { .. })
        ) {
            tracing::debug!(prediction_id = %prediction.id, "already evaluated; skipping");
            return Ok(());
        }
        return Err(err);
    }

    apply_aggregates(pool, opts, prediction, accuracy, actual_change_percent, now).await?;
    storage::predictions::mark_aggregates_applied(pool, prediction.id, now).await
}

/// Direct evaluation with caller-supplied actuals. NotFound and
/// AlreadyEvaluated surface to the caller.
pub async fn evaluate_prediction(
    pool: &PgPool,
    opts: &EngineOptions,
    id: Uuid,
    actual_impact: Impact,
    actual_change_percent: f64,
    now: DateTime<Utc>,
) -> anyhow::Result<Prediction> {
    let prediction = storage::predictions::find_by_id(pool, id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            entity: "prediction",
            id: id.to_string(),
        })?;

    // Ground truth cannot exist before the horizon closes.
    if now < prediction.due_at {
        return Err(EngineError::Validation(format!(
            "prediction {id} is not due until {}",
            prediction.due_at
        ))
        .into());
    }

    let accuracy = score_accuracy(
        prediction.predicted_impact,
        prediction.predicted_change_percent,
        actual_impact,
        actual_change_percent,
    );

    let evaluation = Evaluation {
        actual_impact,
        actual_change_percent,
        accuracy,
        evaluated_at: now,
    };

    storage::predictions::mark_evaluated(pool, id, &evaluation).await?;
    apply_aggregates(pool, opts, &prediction, accuracy, actual_change_percent, now).await?;
    storage::predictions::mark_aggregates_applied(pool, id, now).await?;

    storage::predictions::find_by_id(pool, id)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound {
                entity: "prediction",
                id: id.to_string(),
            }
            .into()
        })
}

/// Rule and pattern updates for one evaluated prediction. Idempotent on the
/// prediction id, so at-least-once retries cannot double count.
async fn apply_aggregates(
    pool: &PgPool,
    opts: &EngineOptions,
    prediction: &Prediction,
    accuracy: f64,
    change_percent: f64,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let success = accuracy >= opts.success_threshold;

    for key in RuleKey::for_prediction(&prediction.source, &prediction.category) {
        storage::rules::apply_evaluation(
            pool,
            prediction.id,
            &key,
            accuracy,
            change_percent,
            success,
            now,
            opts.aggregate_retry_attempts,
        )
        .await?;
    }

    let data = PatternData::normalized(
        &prediction.category,
        prediction.predicted_impact,
        &prediction.time_window,
    );
    storage::patterns::apply_evaluation(
        pool,
        prediction.id,
        PATTERN_TYPE_PREDICTION_OUTCOME,
        &data,
        accuracy,
        prediction.confidence,
        now,
        opts.aggregate_retry_attempts,
    )
    .await?;

    Ok(())
}

async fn heal_aggregates(
    pool: &PgPool,
    opts: &EngineOptions,
    prediction: &Prediction,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let (Some(accuracy), Some(change_percent)) =
        (prediction.accuracy, prediction.actual_change_percent)
    else {
        anyhow::bail!("prediction {} is not evaluated", prediction.id);
    };

    apply_aggregates(pool, opts, prediction, accuracy, change_percent, now).await?;
    storage::predictions::mark_aggregates_applied(pool, prediction.id, now).await
}
