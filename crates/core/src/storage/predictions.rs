use crate::domain::prediction::{Evaluation, Impact, Prediction, PredictionDraft};
use crate::domain::report::EvaluatedPrediction;
use crate::domain::retrospective::PrecedingPrediction;
use crate::error::EngineError;
use crate::time::window;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const PREDICTION_COLUMNS: &str = "id, article_id, stock_symbol, source, category, \
     predicted_impact, predicted_change_percent, confidence, time_window, \
     created_at, due_at, actual_impact, actual_change_percent, accuracy, \
     evaluated_at, aggregates_applied_at";

#[derive(Debug, sqlx::FromRow)]
struct PredictionRecord {
    id: Uuid,
    article_id: Uuid,
    stock_symbol: String,
    source: String,
    category: String,
    predicted_impact: String,
    predicted_change_percent: f64,
    confidence: f64,
    time_window: String,
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    actual_impact: Option<String>,
    actual_change_percent: Option<f64>,
    accuracy: Option<f64>,
    evaluated_at: Option<DateTime<Utc>>,
    aggregates_applied_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    fn into_prediction(self) -> anyhow::Result<Prediction> {
        let actual_impact = match self.actual_impact.as_deref() {
            Some(s) => Some(Impact::parse(s)?),
            None => None,
        };
        Ok(Prediction {
            id: self.id,
            article_id: self.article_id,
            stock_symbol: self.stock_symbol,
            source: self.source,
            category: self.category,
            predicted_impact: Impact::parse(&self.predicted_impact)?,
            predicted_change_percent: self.predicted_change_percent,
            confidence: self.confidence,
            time_window: self.time_window,
            created_at: self.created_at,
            due_at: self.due_at,
            actual_impact,
            actual_change_percent: self.actual_change_percent,
            accuracy: self.accuracy,
            evaluated_at: self.evaluated_at,
            aggregates_applied_at: self.aggregates_applied_at,
        })
    }
}

/// Validates and stores a pending prediction; returns the assigned id.
pub async fn record(
    pool: &sqlx::PgPool,
    draft: &PredictionDraft,
    now: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    draft.validate()?;
    let due_at = window::resolve_due_at(now, &draft.time_window)?;
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO predictions (id, article_id, stock_symbol, source, category, \
         predicted_impact, predicted_change_percent, confidence, time_window, \
         created_at, due_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(id)
    .bind(draft.article_id)
    .bind(draft.stock_symbol.trim())
    .bind(draft.source.trim())
    .bind(draft.category.trim())
    .bind(draft.predicted_impact.as_str())
    .bind(draft.predicted_change_percent)
    .bind(draft.confidence)
    .bind(draft.time_window.trim())
    .bind(now)
    .bind(due_at)
    .execute(pool)
    .await
    .context("insert predictions failed")?;

    Ok(id)
}

pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> anyhow::Result<Option<Prediction>> {
    let row = sqlx::query_as::<_, PredictionRecord>(&format!(
        "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("select prediction by id failed")?;

    row.map(PredictionRecord::into_prediction).transpose()
}

/// Pending predictions whose deadline has passed. Re-queries the store on
/// every call, so an interrupted pass resumes cleanly.
pub async fn find_due(pool: &sqlx::PgPool, now: DateTime<Utc>) -> anyhow::Result<Vec<Prediction>> {
    let rows = sqlx::query_as::<_, PredictionRecord>(&format!(
        "SELECT {PREDICTION_COLUMNS} FROM predictions \
         WHERE accuracy IS NULL AND due_at <= $1 \
         ORDER BY due_at ASC"
    ))
    .bind(now)
    .fetch_all(pool)
    .await
    .context("select due predictions failed")?;

    rows.into_iter()
        .map(PredictionRecord::into_prediction)
        .collect()
}

/// Evaluated predictions whose rule/pattern updates have not committed yet;
/// the evaluation pass retries these before taking on new work.
pub async fn find_unapplied(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Prediction>> {
    let rows = sqlx::query_as::<_, PredictionRecord>(&format!(
        "SELECT {PREDICTION_COLUMNS} FROM predictions \
         WHERE accuracy IS NOT NULL AND aggregates_applied_at IS NULL \
         ORDER BY evaluated_at ASC"
    ))
    .fetch_all(pool)
    .await
    .context("select unapplied predictions failed")?;

    rows.into_iter()
        .map(PredictionRecord::into_prediction)
        .collect()
}

/// Transitions a prediction to evaluated, exactly once. The guard is in the
/// WHERE clause, so a concurrent second evaluation cannot slip through.
pub async fn mark_evaluated(
    pool: &sqlx::PgPool,
    id: Uuid,
    evaluation: &Evaluation,
) -> anyhow::Result<()> {
    let res = sqlx::query(
        "UPDATE predictions \
         SET actual_impact = $2, actual_change_percent = $3, accuracy = $4, evaluated_at = $5 \
         WHERE id = $1 AND accuracy IS NULL",
    )
    .bind(id)
    .bind(evaluation.actual_impact.as_str())
    .bind(evaluation.actual_change_percent)
    .bind(evaluation.accuracy)
    .bind(evaluation.evaluated_at)
    .execute(pool)
    .await
    .context("update prediction evaluation failed")?;

    if res.rows_affected() > 0 {
        return Ok(());
    }

    let exists: Option<(bool,)> =
        sqlx::query_as("SELECT accuracy IS NOT NULL FROM predictions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("select prediction state failed")?;

    match exists {
        Some(_) => Err(EngineError::AlreadyEvaluated { prediction_id: id }.into()),
        None => Err(EngineError::NotFound {
            entity: "prediction",
            id: id.to_string(),
        }
        .into()),
    }
}

pub async fn mark_aggregates_applied(
    pool: &sqlx::PgPool,
    id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE predictions SET aggregates_applied_at = $2 \
         WHERE id = $1 AND aggregates_applied_at IS NULL",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await
    .context("update aggregates_applied_at failed")?;
    Ok(())
}

/// Predictions for a symbol created inside [start, end] — the coverage count
/// the retrospective scanner starts from.
pub async fn count_created_in_window(
    pool: &sqlx::PgPool,
    symbol: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM predictions \
         WHERE stock_symbol = $1 AND created_at >= $2 AND created_at <= $3",
    )
    .bind(symbol)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
    .context("count predictions in window failed")?;
    Ok(count)
}

/// Direction/confidence pairs of the predictions covering a movement window.
pub async fn preceding_predictions(
    pool: &sqlx::PgPool,
    symbol: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<Vec<PrecedingPrediction>> {
    let rows = sqlx::query_as::<_, (String, f64)>(
        "SELECT predicted_impact, confidence FROM predictions \
         WHERE stock_symbol = $1 AND created_at >= $2 AND created_at <= $3",
    )
    .bind(symbol)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("select preceding predictions failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (impact, confidence) in rows {
        out.push(PrecedingPrediction {
            predicted_impact: Impact::parse(&impact)?,
            confidence,
        });
    }
    Ok(out)
}

/// Predictions evaluated inside [start, end), as the report builder
/// consumes them.
pub async fn evaluated_in_window(
    pool: &sqlx::PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<Vec<EvaluatedPrediction>> {
    let rows = sqlx::query_as::<_, (String, f64, f64)>(
        "SELECT stock_symbol, actual_change_percent, accuracy FROM predictions \
         WHERE accuracy IS NOT NULL AND evaluated_at >= $1 AND evaluated_at < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("select evaluated predictions failed")?;

    Ok(rows
        .into_iter()
        .map(|(stock_symbol, actual_change_percent, accuracy)| EvaluatedPrediction {
            stock_symbol,
            actual_change_percent,
            accuracy,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AccuracyStats {
    pub total_predictions: i64,
    pub evaluated_predictions: i64,
    pub average_accuracy: f64,
}

pub async fn accuracy_stats(
    pool: &sqlx::PgPool,
    symbol: Option<&str>,
) -> anyhow::Result<AccuracyStats> {
    let row: (i64, i64, f64) = match symbol {
        Some(symbol) => {
            sqlx::query_as(
                "SELECT COUNT(*), COUNT(accuracy), COALESCE(AVG(accuracy), 0) \
                 FROM predictions WHERE stock_symbol = $1",
            )
            .bind(symbol)
            .fetch_one(pool)
            .await
            .context("select accuracy stats failed")?
        }
        None => sqlx::query_as(
            "SELECT COUNT(*), COUNT(accuracy), COALESCE(AVG(accuracy), 0) FROM predictions",
        )
        .fetch_one(pool)
        .await
        .context("select accuracy stats failed")?,
    };

    Ok(AccuracyStats {
        total_predictions: row.0,
        evaluated_predictions: row.1,
        average_accuracy: row.2,
    })
}
