//! Generic timestamp checkpoint read/advance, shared by every stage whose
//! `*_state` table follows the `(id=1, last_processed_timestamp,
//! total_processed, last_update)` shape.

use crate::error::DbError;
use chrono::NaiveDateTime;
use sqlx::PgPool;

/// Reads `last_processed_timestamp`, initializing the row to `now -
/// initial_lookback` if absent — matching
/// `feature_aggregator.py::get_last_processed_timestamp`.
pub async fn read_checkpoint(
    pool: &PgPool,
    table_name: &str,
    now: NaiveDateTime,
    initial_lookback: chrono::Duration,
) -> Result<NaiveDateTime, DbError> {
    let select_sql = format!(
        "SELECT last_processed_timestamp FROM public.{table_name} WHERE id = 1"
    );
    let row: Option<(Option<NaiveDateTime>,)> = sqlx::query_as(&select_sql)
        .fetch_optional(pool)
        .await?;

    if let Some((Some(ts),)) = row {
        return Ok(ts);
    }

    let default_ts = now - initial_lookback;
    let insert_sql = format!(
        "INSERT INTO public.{table_name} (id, last_processed_timestamp) VALUES (1, $1) \
         ON CONFLICT (id) DO NOTHING"
    );
    sqlx::query(&insert_sql).bind(default_ts).execute(pool).await?;
    Ok(default_ts)
}

/// Advances the checkpoint and bumps `total_processed`, matching
/// `update_state()` in every Python detector service. Always advances,
/// even when `processed_count` is zero, so the window never re-processed.
pub async fn advance_checkpoint(
    pool: &PgPool,
    table_name: &str,
    last_ts: NaiveDateTime,
    processed_count: i64,
) -> Result<(), DbError> {
    let sql = format!(
        "UPDATE public.{table_name} \
         SET last_processed_timestamp = $1, total_processed = total_processed + $2, last_update = NOW() \
         WHERE id = 1"
    );
    sqlx::query(&sql)
        .bind(last_ts)
        .bind(processed_count)
        .execute(pool)
        .await?;
    Ok(())
}
