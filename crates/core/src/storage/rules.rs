use crate::domain::rule::{Rule, RuleKey, RuleStats};
use crate::error::EngineError;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

pub async fn get(
    pool: &sqlx::PgPool,
    rule_type: &str,
    rule_value: &str,
) -> anyhow::Result<Option<Rule>> {
    let row = sqlx::query_as::<_, (i64, i64, f64, f64, f64, DateTime<Utc>)>(
        "SELECT total_predictions, successful_predictions, success_rate, \
         average_accuracy, average_change_percent, last_updated \
         FROM rules WHERE rule_type = $1 AND rule_value = $2",
    )
    .bind(rule_type)
    .bind(rule_value)
    .fetch_optional(pool)
    .await
    .context("select rule failed")?;

    Ok(row.map(|r| Rule {
        rule_type: rule_type.to_string(),
        rule_value: rule_value.to_string(),
        stats: RuleStats {
            total_predictions: r.0,
            successful_predictions: r.1,
            success_rate: r.2,
            average_accuracy: r.3,
            average_change_percent: r.4,
        },
        last_updated: r.5,
    }))
}

pub async fn list(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Rule>> {
    let rows = sqlx::query_as::<_, (String, String, i64, i64, f64, f64, f64, DateTime<Utc>)>(
        "SELECT rule_type, rule_value, total_predictions, successful_predictions, \
         success_rate, average_accuracy, average_change_percent, last_updated \
         FROM rules ORDER BY rule_type ASC, rule_value ASC",
    )
    .fetch_all(pool)
    .await
    .context("select rules failed")?;

    Ok(rows
        .into_iter()
        .map(|r| Rule {
            rule_type: r.0,
            rule_value: r.1,
            stats: RuleStats {
                total_predictions: r.2,
                successful_predictions: r.3,
                success_rate: r.4,
                average_accuracy: r.5,
                average_change_percent: r.6,
            },
            last_updated: r.7,
        })
        .collect())
}

/// Folds one evaluated prediction into a rule's running statistics, exactly
/// once per (prediction, rule key). Returns false when the prediction was
/// already applied to this key.
///
/// Per-key serialization is optimistic: the UPDATE is conditioned on the
/// observed total_predictions, a lost race rolls back and retries, and the
/// bounded attempts surface as TransientFailure.
pub async fn apply_evaluation(
    pool: &sqlx::PgPool,
    prediction_id: Uuid,
    key: &RuleKey,
    accuracy: f64,
    change_percent: f64,
    success: bool,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> anyhow::Result<bool> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let res = try_apply(
            pool,
            prediction_id,
            key,
            accuracy,
            change_percent,
            success,
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
                            "rule update for {key} conflicted {attempt} times"
                        ),
                    }
                    .into());
                }
                tracing::warn!(%key, attempt, "rule update conflicted; retrying");
                tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
            }
        }
    }
}

async fn try_apply(
    pool: &sqlx::PgPool,
    prediction_id: Uuid,
    key: &RuleKey,
    accuracy: f64,
    change_percent: f64,
    success: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    // The application ledger and the stats write commit together, so a crash
    // cannot record one without the other.
    let inserted = sqlx::query(
        "INSERT INTO rule_applications (prediction_id, rule_type, rule_value, applied_at) \
         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
    )
    .bind(prediction_id)
    .bind(key.rule_type())
    .bind(key.rule_value())
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("insert rule_applications failed")?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await.context("rollback failed")?;
        return Ok(false);
    }

    let current = sqlx::query_as::<_, (i64, i64, f64, f64)>(
        "SELECT total_predictions, successful_predictions, average_accuracy, \
         average_change_percent FROM rules WHERE rule_type = $1 AND rule_value = $2",
    )
    .bind(key.rule_type())
    .bind(key.rule_value())
    .fetch_optional(&mut *tx)
    .await
    .context("select rule stats failed")?;

    let applied = match current {
        None => {
            let stats = RuleStats::default().apply(accuracy, change_percent, success);
            let res = sqlx::query(
                "INSERT INTO rules (rule_type, rule_value, total_predictions, \
                 successful_predictions, success_rate, average_accuracy, \
                 average_change_percent, last_updated) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (rule_type, rule_value) DO NOTHING",
            )
            .bind(key.rule_type())
            .bind(key.rule_value())
            .bind(stats.total_predictions)
            .bind(stats.successful_predictions)
            .bind(stats.success_rate)
            .bind(stats.average_accuracy)
            .bind(stats.average_change_percent)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert rules failed")?;
            res.rows_affected() > 0
        }
        Some((total, successful, avg_accuracy, avg_change)) => {
            let stats = RuleStats {
                total_predictions: total,
                successful_predictions: successful,
                success_rate: if total == 0 {
                    0.0
                } else {
                    successful as f64 / total as f64
                },
                average_accuracy: avg_accuracy,
                average_change_percent: avg_change,
            }
            .apply(accuracy, change_percent, success);

            let res = sqlx::query(
                "UPDATE rules SET total_predictions = $3, successful_predictions = $4, \
                 success_rate = $5, average_accuracy = $6, average_change_percent = $7, \
                 last_updated = $8 \
                 WHERE rule_type = $1 AND rule_value = $2 AND total_predictions = $9",
            )
            .bind(key.rule_type())
            .bind(key.rule_value())
            .bind(stats.total_predictions)
            .bind(stats.successful_predictions)
            .bind(stats.success_rate)
            .bind(stats.average_accuracy)
            .bind(stats.average_change_percent)
            .bind(now)
            .bind(total)
            .execute(&mut *tx)
            .await
            .context("update rules failed")?;
            res.rows_affected() > 0
        }
    };

    if !applied {
        tx.rollback().await.context("rollback failed")?;
        return Err(EngineError::AggregateUpdateConflict {
            key: key.to_string(),
        }
        .into());
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(true)
}
