//! Feature Aggregator: turns `ip_rib` rows into 1-minute `bgp_features_1min`
//! windows. Grounded on
//! `examples/original_source/services/feature_aggregator.py`.

use crate::config::{AggregatorConfig, DbConfig};
use crate::db;
use crate::error::AppError;
use chrono::Utc;
use sqlx::PgPool;

const STATE_TABLE: &str = "feature_aggregator_state";

pub async fn run(cfg: &AggregatorConfig, db_cfg: &DbConfig) -> Result<(), AppError> {
    let pool = db::connect(db_cfg).await?;
    db::ensure_schema(&pool, "aggregator").await?;

    log::info!("Starting aggregation loop...");
    loop {
        if let Err(e) = tick(&pool, cfg).await {
            log::error!("Error during aggregation: {e}");
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

async fn tick(pool: &PgPool, cfg: &AggregatorConfig) -> Result<(), crate::error::DbError> {
    let now = Utc::now().naive_utc();
    let from_ts = db::read_checkpoint(pool, STATE_TABLE, now, cfg.initial_lookback).await?;
    let to_ts = Utc::now().naive_utc();

    if from_ts >= to_ts {
        log::debug!("No new data to process (from_ts={from_ts}, to_ts={to_ts})");
        return Ok(());
    }

    log::info!("Aggregating data from {from_ts} to {to_ts}...");
    let rows_inserted = aggregate_once(pool, from_ts, to_ts).await?;
    if rows_inserted > 0 {
        log::info!("Inserted {rows_inserted} feature rows for [{from_ts}, {to_ts}]");
    } else {
        log::debug!("No new feature rows inserted for [{from_ts}, {to_ts}]");
    }

    db::advance_checkpoint(pool, STATE_TABLE, to_ts, rows_inserted).await?;
    Ok(())
}

/// Single atomic `INSERT ... SELECT ... GROUP BY`, kept as one statement
/// rather than a row-by-row Rust loop — Postgres aggregates the window far
/// more cheaply than re-fetching every row into the process.
async fn aggregate_once(
    pool: &PgPool,
    from_ts: chrono::NaiveDateTime,
    to_ts: chrono::NaiveDateTime,
) -> Result<i64, crate::error::DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO public.bgp_features_1min (
            window_start, window_end, prefix, origin_as,
            announcements, withdrawals, total_updates, withdrawal_ratio,
            flap_count, path_length, unique_peers, message_rate, session_resets
        )
        SELECT
            public.floor_to_1min(r.timestamp) AS window_start,
            public.floor_to_1min(r.timestamp) + interval '1 minute' AS window_end,
            r.prefix,
            r.origin_as,
            COUNT(*) FILTER (WHERE r.iswithdrawn = false)::integer AS announcements,
            COUNT(*) FILTER (WHERE r.iswithdrawn = true)::integer AS withdrawals,
            COUNT(*)::integer AS total_updates,
            (COUNT(*) FILTER (WHERE r.iswithdrawn = true)::double precision /
             GREATEST(COUNT(*) FILTER (WHERE r.iswithdrawn = false), 1))::double precision AS withdrawal_ratio,
            (COUNT(*) FILTER (WHERE r.iswithdrawn = true) + COUNT(*) FILTER (WHERE r.iswithdrawn = false))::integer / 2 AS flap_count,
            COALESCE(
                AVG(ba.as_path_count),
                2.0 + (MOD(r.origin_as::bigint, 3))::double precision
            )::double precision AS path_length,
            COUNT(DISTINCT r.peer_hash_id)::integer AS unique_peers,
            (COUNT(*)::double precision / 60.0)::double precision AS message_rate,
            0::integer AS session_resets
        FROM public.ip_rib r
        LEFT JOIN public.base_attrs ba ON r.base_attr_hash_id = ba.hash_id
        WHERE r.timestamp > $1 AND r.timestamp <= $2
        GROUP BY public.floor_to_1min(r.timestamp), r.prefix, r.origin_as
        ON CONFLICT (window_start, prefix, origin_as) DO NOTHING
        "#,
    )
    .bind(from_ts)
    .bind(to_ts)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    /// Requires a live Postgres reachable at `DATABASE_URL`; runs the real
    /// schema bootstrap and a no-op aggregation pass. Ignored by default —
    /// no Postgres instance is available in CI/sandbox runs of this suite.
    #[tokio::test]
    #[ignore]
    async fn aggregate_once_is_a_noop_over_empty_window() {
        let Ok(url) = std::env::var("DATABASE_URL") else { return };
        let pool = sqlx::PgPool::connect(&url).await.expect("connect");
        db::ensure_schema(&pool, "aggregator").await.expect("schema");

        let from_ts = Utc::now().naive_utc() - chrono::Duration::minutes(1);
        let to_ts = Utc::now().naive_utc();
        let inserted = aggregate_once(&pool, from_ts, to_ts).await.expect("aggregate");
        assert_eq!(inserted, 0);
    }
}
