use anyhow::Context;

// Advisory locks are scoped to the Postgres session. Used as a guard so a new
// run of a job does not start while the previous run of the same job is still
// in flight: skip-if-busy, never queue-and-run-later.
const LOCK_NAMESPACE: i64 = 0x4E45_5753_4747; // "NEWSGG" as hex-ish namespace.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Evaluation,
    RetrospectiveScan,
    DailyReport,
}

impl Job {
    pub fn name(self) -> &'static str {
        match self {
            Job::Evaluation => "evaluation",
            Job::RetrospectiveScan => "retrospective_scan",
            Job::DailyReport => "daily_report",
        }
    }

    fn discriminant(self) -> i64 {
        match self {
            Job::Evaluation => 1,
            Job::RetrospectiveScan => 2,
            Job::DailyReport => 3,
        }
    }
}

fn lock_key_for_job(job: Job) -> i64 {
    LOCK_NAMESPACE ^ job.discriminant()
}

pub async fn try_acquire_job_lock(pool: &sqlx::PgPool, job: Job) -> anyhow::Result<bool> {
    let key = lock_key_for_job(job);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (job={}, key={key})", job.name()))?;
    Ok(acquired.0)
}

pub async fn release_job_lock(pool: &sqlx::PgPool, job: Job) -> anyhow::Result<()> {
    let key = lock_key_for_job(job);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (job={}, key={key})", job.name()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lock_keys_are_distinct() {
        let keys = [
            lock_key_for_job(Job::Evaluation),
            lock_key_for_job(Job::RetrospectiveScan),
            lock_key_for_job(Job::DailyReport),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
    }
}
