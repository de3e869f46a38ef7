//! `CREATE TABLE IF NOT EXISTS` bootstrap, one function per stage, mirroring
//! each Python service's inline `ensure_tables`/`init_state_table`.

use crate::error::DbError;
use sqlx::PgPool;

/// Tables shared by the collector: OpenBMP-style `bgp_peers`, `base_attrs`,
/// `ip_rib`. Grounded on `examples/original_source/setup_database.py`.
pub async fn ensure_collector_schema(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.bgp_peers (
            hash_id         uuid PRIMARY KEY,
            router_hash_id  uuid NOT NULL,
            peer_rd         text NOT NULL DEFAULT '',
            isipv4          boolean NOT NULL,
            peer_addr       inet NOT NULL,
            peer_as         bigint NOT NULL,
            state           text NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.base_attrs (
            hash_id         uuid PRIMARY KEY,
            peer_hash_id    uuid NOT NULL REFERENCES public.bgp_peers(hash_id),
            origin          text NOT NULL,
            as_path         bigint[] NOT NULL,
            as_path_count   integer NOT NULL,
            origin_as       bigint NOT NULL,
            next_hop        inet,
            nexthop_isipv4  boolean NOT NULL,
            timestamp       timestamp without time zone NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.ip_rib (
            hash_id               uuid PRIMARY KEY,
            base_attr_hash_id     uuid NOT NULL REFERENCES public.base_attrs(hash_id),
            peer_hash_id          uuid NOT NULL REFERENCES public.bgp_peers(hash_id),
            isipv4                boolean NOT NULL,
            origin_as             bigint NOT NULL,
            prefix                inet NOT NULL,
            timestamp             timestamp without time zone NOT NULL,
            first_added_timestamp timestamp without time zone NOT NULL,
            iswithdrawn           boolean NOT NULL,
            path_id               integer NOT NULL DEFAULT 0,
            labels                text
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `bgp_features_1min` + the `floor_to_1min` helper + the aggregator's
/// checkpoint row. Grounded on `services/feature_aggregator.py::ensure_tables`.
pub async fn ensure_aggregator_schema(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION public.floor_to_1min(ts timestamp without time zone)
        RETURNS timestamp without time zone AS $$
            SELECT date_trunc('minute', ts)
        $$ LANGUAGE sql IMMUTABLE
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.bgp_features_1min (
            id               bigserial PRIMARY KEY,
            window_start     timestamp not null,
            window_end       timestamp not null,
            prefix           inet      not null,
            origin_as        bigint    not null,
            announcements    integer   not null,
            withdrawals      integer   not null,
            total_updates    integer   not null,
            withdrawal_ratio double precision not null,
            flap_count       integer   not null,
            path_length      double precision,
            unique_peers     integer   not null,
            message_rate     double precision not null,
            session_resets   integer   not null
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS bgp_features_1min_window_prefix_origin_idx
        ON public.bgp_features_1min (window_start, prefix, origin_as)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.feature_aggregator_state (
            id integer PRIMARY KEY DEFAULT 1,
            last_processed_timestamp timestamp
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `hybrid_anomaly_detections` + each detector's own `*_state` row.
/// Grounded on `heuristic_detector.py`/`ml_inference_service.py::init_state_table`.
pub async fn ensure_detections_schema(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.hybrid_anomaly_detections (
            id                bigserial PRIMARY KEY,
            timestamp         timestamp without time zone not null,
            detection_id      text unique not null,
            prefix            inet not null,
            prefix_length     integer not null,
            peer_ip           inet,
            peer_asn          bigint,
            origin_as         bigint not null,
            as_path           bigint[],
            next_hop          inet,
            event_type        text not null,
            message_type      text not null,
            rpki_status       text,
            rpki_anomaly      boolean not null default false,
            combined_anomaly  boolean not null,
            combined_score    double precision not null,
            combined_severity text not null,
            classification    text not null,
            metadata          jsonb not null
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn ensure_state_table(pool: &PgPool, table_name: &str) -> Result<(), DbError> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS public.{table_name} (
            id integer PRIMARY KEY DEFAULT 1,
            last_processed_timestamp timestamp without time zone,
            total_processed bigint DEFAULT 0,
            last_update timestamp without time zone DEFAULT NOW(),
            CHECK (id = 1)
        )
        "#
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// The correlator tracks a monotonic `id` checkpoint rather than a
/// timestamp, since several detections can share one timestamp.
pub async fn ensure_correlator_state(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS public.correlator_state (
            id integer PRIMARY KEY DEFAULT 1,
            last_processed_id bigint NOT NULL DEFAULT 0,
            total_processed bigint DEFAULT 0,
            last_update timestamp without time zone DEFAULT NOW(),
            CHECK (id = 1)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Convenience entry point: each binary calls the bootstrap relevant to it.
pub async fn ensure_schema(pool: &PgPool, stage: &str) -> Result<(), DbError> {
    match stage {
        "collector" => ensure_collector_schema(pool).await,
        "aggregator" => ensure_aggregator_schema(pool).await,
        "heuristic_detector" => {
            ensure_detections_schema(pool).await?;
            ensure_state_table(pool, "heuristic_inference_state").await
        }
        "ml_detector" => {
            ensure_detections_schema(pool).await?;
            ensure_state_table(pool, "ml_inference_state").await
        }
        "rpki_detector" => {
            ensure_detections_schema(pool).await?;
            ensure_state_table(pool, "rpki_detector_state").await
        }
        "correlator" => {
            ensure_detections_schema(pool).await?;
            ensure_correlator_state(pool).await
        }
        other => panic!("unknown stage {other}"),
    }
}
