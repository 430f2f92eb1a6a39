use crate::domain::pattern::{Pattern, PatternData, PatternStats};
use crate::error::EngineError;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

pub async fn get_by_type(
    pool: &sqlx::PgPool,
    pattern_type: &str,
    min_samples: i64,
) -> anyhow::Result<Vec<Pattern>> {
    let rows = sqlx::query_as::<_, (serde_json::Value, f64, i64, f64, DateTime<Utc>)>(
        "SELECT pattern_data, confidence, occurrences, accuracy, last_seen \
         FROM patterns WHERE pattern_type = $1 \
         ORDER BY accuracy DESC, occurrences DESC",
    )
    .bind(pattern_type)
    .fetch_all(pool)
    .await
    .context("select patterns failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (data, confidence, occurrences, accuracy, last_seen) in rows {
        let pattern_data = serde_json::from_value::<PatternData>(data)
            .context("malformed pattern_data in store")?;
        let stats = PatternStats {
            occurrences,
            accuracy,
            confidence,
        };
        out.push(Pattern {
            pattern_type: pattern_type.to_string(),
            pattern_data,
            stats,
            low_confidence: stats.is_low_confidence(min_samples),
            last_seen,
        });
    }
    Ok(out)
}

/// Folds one evaluated prediction into a pattern's running statistics,
/// exactly once per (prediction, pattern key). Returns false when the
/// prediction was already applied. Same optimistic scheme as rules: the
/// UPDATE is conditioned on the observed occurrence count.
pub async fn apply_evaluation(
    pool: &sqlx::PgPool,
    prediction_id: Uuid,
    pattern_type: &str,
    data: &PatternData,
    accuracy: f64,
    confidence: f64,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> anyhow::Result<bool> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let res = try_apply(
            pool,
            prediction_id,
            pattern_type,
            data,
            accuracy,
            confidence,
            now,
        )
        .await;

        match res {
            Ok(applied) => return Ok(applied),
            Err(err) => {
                let conflicted = matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::AggregateUpdateConflict { .. })
                );
                if !conflicted {
                    return Err(err);
                }
                if attempt >= max_attempts {
                    return Err(EngineError::TransientFailure {
                        detail: format!(
                            "pattern update for {pattern_type} conflicted {attempt} times"
                        ),
                    }
                    .into());
                }
                tracing::warn!(pattern_type, attempt, "pattern update conflicted; retrying");
                tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
            }
        }
    }
}

async fn try_apply(
    pool: &sqlx::PgPool,
    prediction_id: Uuid,
    pattern_type: &str,
    data: &PatternData,
    accuracy: f64,
    confidence: f64,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let data_json = data.to_json();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let inserted = sqlx::query(
        "INSERT INTO pattern_applications (prediction_id, pattern_type, pattern_data, applied_at) \
         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
    )
    .bind(prediction_id)
    .bind(pattern_type)
    .bind(&data_json)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("insert pattern_applications failed")?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await.context("rollback failed")?;
        return Ok(false);
    }

    let current = sqlx::query_as::<_, (i64, f64, f64)>(
        "SELECT occurrences, accuracy, confidence FROM patterns \
         WHERE pattern_type = $1 AND pattern_data = $2",
    )
    .bind(pattern_type)
    .bind(&data_json)
    .fetch_optional(&mut *tx)
    .await
    .context("select pattern stats failed")?;

    let applied = match current {
        None => {
            let stats = PatternStats::seed(accuracy, confidence);
            let res = sqlx::query(
                "INSERT INTO patterns (pattern_type, pattern_data, confidence, \
                 occurrences, accuracy, last_seen) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (pattern_type, pattern_data) DO NOTHING",
            )
            .bind(pattern_type)
            .bind(&data_json)
            .bind(stats.confidence)
            .bind(stats.occurrences)
            .bind(stats.accuracy)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert patterns failed")?;
            res.rows_affected() > 0
        }
        Some((occurrences, current_accuracy, current_confidence)) => {
            let stats = PatternStats {
                occurrences,
                accuracy: current_accuracy,
                confidence: current_confidence,
            }
            .apply(accuracy, confidence);

            let res = sqlx::query(
                "UPDATE patterns SET occurrences = $3, accuracy = $4, confidence = $5, \
                 last_seen = $6 \
                 WHERE pattern_type = $1 AND pattern_data = $2 AND occurrences = $7",
            )
            .bind(pattern_type)
            .bind(&data_json)
            .bind(stats.occurrences)
            .bind(stats.accuracy)
            .bind(stats.confidence)
            .bind(now)
            .bind(occurrences)
            .execute(&mut *tx)
            .await
            .context("update patterns failed")?;
            res.rows_affected() > 0
        }
    };

    if !applied {
        tx.rollback().await.context("rollback failed")?;
        return Err(EngineError::AggregateUpdateConflict {
            key: format!("{pattern_type}:{data_json}"),
        }
        .into());
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(true)
}
