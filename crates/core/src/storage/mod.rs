use anyhow::Context;

pub mod lock;
pub mod patterns;
pub mod predictions;
pub mod reports;
pub mod retrospectives;
pub mod rules;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
