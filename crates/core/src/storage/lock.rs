use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Advisory locks are scoped to the Postgres session. This guards against two runs of the
// same mode for the same date.
const LOCK_NAMESPACE: i64 = 0x5045_4552_524B; // "PEERRK"

fn lock_key(mode: &str, as_of_date: NaiveDate) -> i64 {
    // FNV-1a; the key must not change between builds.
    let mode_hash = mode.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    LOCK_NAMESPACE ^ (mode_hash as i64).rotate_left(24) ^ i64::from(as_of_date.num_days_from_ce())
}

pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    mode: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key(mode, as_of_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (mode={mode}, key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    mode: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key(mode, as_of_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (mode={mode}, key={key})"))?;
    Ok(())
}
