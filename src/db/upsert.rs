//! Idempotent upserts for the collector's entities and detections.

use crate::error::DbError;
use crate::models::{Detection, DetectionMetadata};
use ipnetwork::IpNetwork;
use sqlx::PgPool;
use std::net::IpAddr;
use uuid::Uuid;

/// Mirrors `get_peer_hash_id`: check-then-insert, tolerating a concurrent
/// insert racing us to the same deterministic `hash_id`.
pub async fn upsert_peer(
    pool: &PgPool,
    hash_id: Uuid,
    peer_addr: IpAddr,
    peer_asn: i64,
) -> Result<(), DbError> {
    let exists: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM public.bgp_peers WHERE hash_id = $1")
            .bind(hash_id)
            .fetch_optional(pool)
            .await?;
    if exists.is_some() {
        return Ok(());
    }

    let isipv4 = peer_addr.is_ipv4();
    let router_hash_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO public.bgp_peers (hash_id, router_hash_id, peer_rd, isipv4, peer_addr, peer_as, state) \
         VALUES ($1, $2, '', $3, $4, $5, 'up')",
    )
    .bind(hash_id)
    .bind(router_hash_id)
    .bind(isipv4)
    .bind(IpNetwork::from(peer_addr))
    .bind(peer_asn)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_base_attrs(
    pool: &PgPool,
    hash_id: Uuid,
    peer_hash_id: Uuid,
    as_path: &[i64],
    origin_as: i64,
    next_hop: Option<IpAddr>,
    timestamp: chrono::NaiveDateTime,
) -> Result<(), DbError> {
    let exists: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM public.base_attrs WHERE hash_id = $1")
            .bind(hash_id)
            .fetch_optional(pool)
            .await?;
    if exists.is_some() {
        return Ok(());
    }

    let nexthop_isipv4 = next_hop.map(|ip| ip.is_ipv4()).unwrap_or(true);
    let result = sqlx::query(
        "INSERT INTO public.base_attrs \
         (hash_id, peer_hash_id, origin, as_path, as_path_count, origin_as, next_hop, nexthop_isipv4, timestamp) \
         VALUES ($1, $2, 'IGP', $3, $4, $5, $6, $7, $8)",
    )
    .bind(hash_id)
    .bind(peer_hash_id)
    .bind(as_path)
    .bind(as_path.len() as i32)
    .bind(origin_as)
    .bind(next_hop.map(IpNetwork::from))
    .bind(nexthop_isipv4)
    .bind(timestamp)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_update(
    pool: &PgPool,
    base_attr_hash_id: Uuid,
    peer_hash_id: Uuid,
    isipv4: bool,
    origin_as: i64,
    prefix: IpNetwork,
    timestamp: chrono::NaiveDateTime,
    iswithdrawn: bool,
) -> Result<(), DbError> {
    let hash_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO public.ip_rib \
         (hash_id, base_attr_hash_id, peer_hash_id, isipv4, origin_as, prefix, timestamp, first_added_timestamp, iswithdrawn, path_id, labels) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, 0, NULL)",
    )
    .bind(hash_id)
    .bind(base_attr_hash_id)
    .bind(peer_hash_id)
    .bind(isipv4)
    .bind(origin_as)
    .bind(prefix)
    .bind(timestamp)
    .bind(iswithdrawn)
    .execute(pool)
    .await?;
    Ok(())
}

struct DetectionBind {
    prefix_length: i32,
    metadata_json: serde_json::Value,
    message_type: &'static str,
    combined_anomaly: bool,
}

fn prepare(d: &Detection) -> DetectionBind {
    let message_type = match &d.metadata {
        DetectionMetadata::Heuristic(_) => "bgp_features_1min",
        DetectionMetadata::Ml(_) => "bgp_features_1min",
        DetectionMetadata::Rpki(_) => "rpki_validation",
    };
    let combined_anomaly = matches!(
        d.combined_severity,
        crate::models::Severity::Medium | crate::models::Severity::High | crate::models::Severity::Critical
    );
    DetectionBind {
        prefix_length: d.prefix.prefix() as i32,
        metadata_json: serde_json::to_value(&d.metadata).expect("metadata always serializable"),
        message_type,
        combined_anomaly,
    }
}

/// `ON CONFLICT (detection_id) DO UPDATE` — idempotent re-scoring for
/// detectors whose verdict may legitimately change on a re-run, i.e. the
/// heuristic and ML detectors.
pub async fn insert_detection(pool: &PgPool, d: &Detection) -> Result<(), DbError> {
    let bind = prepare(d);

    sqlx::query(
        "INSERT INTO public.hybrid_anomaly_detections \
         (timestamp, detection_id, prefix, prefix_length, origin_as, event_type, message_type, \
          rpki_status, rpki_anomaly, combined_anomaly, combined_score, combined_severity, classification, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (detection_id) DO UPDATE SET \
            combined_score = EXCLUDED.combined_score, \
            combined_anomaly = EXCLUDED.combined_anomaly, \
            combined_severity = EXCLUDED.combined_severity, \
            metadata = EXCLUDED.metadata, \
            timestamp = EXCLUDED.timestamp",
    )
    .bind(d.timestamp)
    .bind(&d.detection_id)
    .bind(d.prefix)
    .bind(bind.prefix_length)
    .bind(d.origin_as)
    .bind(d.event_type.to_string())
    .bind(bind.message_type)
    .bind(&d.rpki_status)
    .bind(matches!(d.event_type, crate::models::EventType::Rpki))
    .bind(bind.combined_anomaly)
    .bind(d.combined_score)
    .bind(d.combined_severity.to_string())
    .bind(d.classification.to_string())
    .bind(bind.metadata_json)
    .execute(pool)
    .await?;
    Ok(())
}

/// `ON CONFLICT (detection_id) DO NOTHING` — the RPKI detector's detections
/// are immutable for a given window, so a re-run must leave the first
/// insert untouched rather than overwrite it.
pub async fn insert_detection_immutable(pool: &PgPool, d: &Detection) -> Result<(), DbError> {
    let bind = prepare(d);

    sqlx::query(
        "INSERT INTO public.hybrid_anomaly_detections \
         (timestamp, detection_id, prefix, prefix_length, origin_as, event_type, message_type, \
          rpki_status, rpki_anomaly, combined_anomaly, combined_score, combined_severity, classification, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (detection_id) DO NOTHING",
    )
    .bind(d.timestamp)
    .bind(&d.detection_id)
    .bind(d.prefix)
    .bind(bind.prefix_length)
    .bind(d.origin_as)
    .bind(d.event_type.to_string())
    .bind(bind.message_type)
    .bind(&d.rpki_status)
    .bind(matches!(d.event_type, crate::models::EventType::Rpki))
    .bind(bind.combined_anomaly)
    .bind(d.combined_score)
    .bind(d.combined_severity.to_string())
    .bind(d.classification.to_string())
    .bind(bind.metadata_json)
    .execute(pool)
    .await?;
    Ok(())
}
