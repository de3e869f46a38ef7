//! Correlator: fuses detections from the three detectors that refer to the
//! same `(prefix, origin_as)` within a coarse time bucket, assigns a final
//! classification and an escalated severity, and back-annotates every
//! contributing detection row. Grounded on spec.md §4.6 — the Python
//! stub `correlation_engine.py` has no decision logic of its own.

use crate::config::{CorrelatorConfig, DbConfig};
use crate::db;
use crate::error::{AppError, DbError};
use crate::models::Severity;
use chrono::NaiveDateTime;
use ipnetwork::IpNetwork;
use serde_json::Value as Json;
use sqlx::PgPool;
use std::collections::HashMap;

struct DetectionRow {
    id: i64,
    detection_id: String,
    timestamp: NaiveDateTime,
    prefix: IpNetwork,
    origin_as: i64,
    event_type: String,
    combined_severity: String,
    classification: String,
    metadata: Json,
}

pub async fn run(cfg: &CorrelatorConfig, db_cfg: &DbConfig) -> Result<(), AppError> {
    let pool = db::connect(db_cfg).await?;
    db::ensure_schema(&pool, "correlator").await?;

    loop {
        if let Err(e) = tick(&pool).await {
            log::error!("Error in correlator loop: {e}");
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

async fn tick(pool: &PgPool) -> Result<(), DbError> {
    let last_id = read_last_id(pool).await?;
    let rows = fetch_new_detections(pool, last_id).await?;
    if rows.is_empty() {
        return Ok(());
    }

    let max_id = rows.iter().map(|r| r.id).max().unwrap_or(last_id);
    let groups = group_detections(&rows);

    let mut tx = pool.begin().await?;
    for (_key, members) in &groups {
        let (classification, severity) = decide(members);
        let correlated_at = chrono::Utc::now().naive_utc();
        let correlation = serde_json::json!({
            "source_count": distinct_event_types(members).len(),
            "reasoning": format!("{classification} derived from {} source(s)", members.len()),
            "time_window": members.first().map(|r| r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            "correlated_at": correlated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        });

        for row in members.iter() {
            let mut metadata = row.metadata.clone();
            if let Json::Object(ref mut map) = metadata {
                map.insert("correlation".to_string(), correlation.clone());
            }
            sqlx::query(
                "UPDATE public.hybrid_anomaly_detections \
                 SET classification = $1, combined_severity = $2, metadata = $3 \
                 WHERE detection_id = $4",
            )
            .bind(classification)
            .bind(severity.to_string())
            .bind(metadata)
            .bind(&row.detection_id)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    advance_last_id(pool, max_id).await?;
    log::info!("Correlated {} detection(s) into {} group(s)", rows.len(), groups.len());
    Ok(())
}

async fn read_last_id(pool: &PgPool) -> Result<i64, DbError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_processed_id FROM public.correlator_state WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }
    sqlx::query("INSERT INTO public.correlator_state (id, last_processed_id) VALUES (1, 0) ON CONFLICT (id) DO NOTHING")
        .execute(pool)
        .await?;
    Ok(0)
}

async fn advance_last_id(pool: &PgPool, max_id: i64) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE public.correlator_state \
         SET last_processed_id = $1, total_processed = total_processed + 1, last_update = NOW() \
         WHERE id = 1",
    )
    .bind(max_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn fetch_new_detections(pool: &PgPool, last_id: i64) -> Result<Vec<DetectionRow>, DbError> {
    let raw: Vec<(i64, String, NaiveDateTime, IpNetwork, i64, String, String, String, Json)> = sqlx::query_as(
        "SELECT id, detection_id, timestamp, prefix, origin_as, event_type, combined_severity, classification, metadata \
         FROM public.hybrid_anomaly_detections WHERE id > $1 ORDER BY id ASC",
    )
    .bind(last_id)
    .fetch_all(pool)
    .await?;

    Ok(raw
        .into_iter()
        .map(|(id, detection_id, timestamp, prefix, origin_as, event_type, combined_severity, classification, metadata)| DetectionRow {
            id,
            detection_id,
            timestamp,
            prefix,
            origin_as,
            event_type,
            combined_severity,
            classification,
            metadata,
        })
        .collect())
}

/// Groups by `(prefix, origin_as, floor_60s(timestamp))`, per spec.md §4.6.
fn group_detections(rows: &[DetectionRow]) -> Vec<((String, i64, NaiveDateTime), Vec<&DetectionRow>)> {
    let mut groups: HashMap<(String, i64, NaiveDateTime), Vec<&DetectionRow>> = HashMap::new();
    let mut order: Vec<(String, i64, NaiveDateTime)> = Vec::new();

    for row in rows {
        let bucket = floor_60s(row.timestamp);
        let key = (row.prefix.to_string(), row.origin_as, bucket);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    order.into_iter().map(|key| { let members = groups.remove(&key).unwrap_or_default(); (key, members) }).collect()
}

fn floor_60s(ts: NaiveDateTime) -> NaiveDateTime {
    let secs = ts.and_utc().timestamp();
    let floored = secs - secs.rem_euclid(60);
    chrono::DateTime::from_timestamp(floored, 0)
        .expect("valid unix timestamp")
        .naive_utc()
}

fn distinct_event_types<'a>(members: &'a [&'a DetectionRow]) -> std::collections::HashSet<&'a str> {
    members.iter().map(|r| r.event_type.as_str()).collect()
}

/// The RPKI detector's own fixed-vocabulary description of its verdict
/// (stored in both `classification` and `metadata.rpki_description`) — not
/// the validator's raw, uncontrolled `reason` text, which is unsafe to
/// keyword-match on.
fn rpki_description(row: &DetectionRow) -> Option<String> {
    if row.event_type != "rpki" {
        return None;
    }
    Some(row.classification.to_ascii_lowercase())
}

fn rpki_status(row: &DetectionRow) -> Option<String> {
    if row.event_type != "rpki" {
        return None;
    }
    row.metadata
        .get("validator_state")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn heuristic_rule_names(row: &DetectionRow) -> Vec<String> {
    if row.event_type != "heuristic" {
        return Vec::new();
    }
    row.metadata
        .get("triggered_rules")
        .and_then(|v| v.as_array())
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.get("rule_name").and_then(|n| n.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn severity_of(row: &DetectionRow) -> Severity {
    parse_severity(&row.combined_severity)
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Implements the decision matrix from spec.md §4.6, evaluated in order.
fn decide(members: &[&DetectionRow]) -> (&'static str, Severity) {
    let has_rpki_origin_mismatch = members
        .iter()
        .any(|r| rpki_description(r).map(|d| d.contains("origin-as mismatch") || d.contains("hijack")).unwrap_or(false));
    let has_rpki_maxlength = members
        .iter()
        .any(|r| rpki_description(r).map(|d| d.contains("maxlength") || d.contains("leak")).unwrap_or(false));
    let has_rpki_invalid = members.iter().any(|r| rpki_status(r).as_deref() == Some("invalid"));
    let has_heuristic = members.iter().any(|r| r.event_type == "heuristic");
    let has_path_inflation = members.iter().any(|r| heuristic_rule_names(r).iter().any(|n| n.contains("path_inflation")));

    let source_count = distinct_event_types(members).len();
    let max_severity = members.iter().map(|r| severity_of(r)).max().unwrap_or(Severity::Low);

    if has_rpki_origin_mismatch {
        return ("hijack", Severity::Critical);
    }
    if has_rpki_maxlength && has_path_inflation {
        return ("leak", Severity::Critical);
    }
    if has_rpki_maxlength {
        return ("leak", Severity::High);
    }
    if has_rpki_invalid && has_heuristic {
        return ("invalid", Severity::High);
    }
    if has_rpki_invalid {
        return ("invalid", Severity::High);
    }
    if source_count >= 4 {
        return ("suspicious", Severity::Critical);
    }
    if source_count == 3 {
        return ("suspicious", Severity::High);
    }
    if source_count == 2 {
        return ("suspicious", Severity::Medium);
    }
    if source_count == 1 && matches!(max_severity, Severity::High | Severity::Critical) {
        return ("suspicious", max_severity);
    }
    ("normal", max_severity)
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(event_type: &str, severity: &str, classification: &str, metadata: Json) -> DetectionRow {
        DetectionRow {
            id: 1,
            detection_id: "x".to_string(),
            timestamp: NaiveDateTime::parse_from_str("2026-01-01 00:00:30", "%Y-%m-%d %H:%M:%S").unwrap(),
            prefix: "198.51.100.0/24".parse().unwrap(),
            origin_as: 65000,
            event_type: event_type.to_string(),
            combined_severity: severity.to_string(),
            classification: classification.to_string(),
            metadata,
        }
    }

    #[test]
    fn floor_60s_truncates_to_minute() {
        let ts = NaiveDateTime::parse_from_str("2026-01-01 00:00:37", "%Y-%m-%d %H:%M:%S").unwrap();
        let floored = floor_60s(ts);
        assert_eq!(floored.format("%H:%M:%S").to_string(), "00:00:00");
    }

    #[test]
    fn rpki_origin_mismatch_wins_as_hijack() {
        // Raw validator text carries no "mismatch"/"hijack" substring; only
        // the detector's own controlled-vocabulary classification does.
        let r = row(
            "rpki",
            "critical",
            "Origin-AS mismatch (hijack signal)",
            serde_json::json!({"reason": "AS path verification failed", "validator_state": "invalid", "rpki_description": "Origin-AS mismatch (hijack signal)"}),
        );
        let members = vec![&r];
        let (classification, severity) = decide(&members);
        assert_eq!(classification, "hijack");
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn maxlength_and_path_inflation_is_leak_critical() {
        let rpki = row(
            "rpki",
            "high",
            "MaxLength violation (leak/config)",
            serde_json::json!({"reason": "prefix length not covered by any matching ROA", "validator_state": "invalid", "rpki_description": "MaxLength violation (leak/config)"}),
        );
        let heur = row(
            "heuristic",
            "high",
            "path_inflation",
            serde_json::json!({"triggered_rules": [{"rule_name": "path_inflation_high", "severity": "high", "score": 1.0, "reason": "x"}]}),
        );
        let members = vec![&rpki, &heur];
        let (classification, severity) = decide(&members);
        assert_eq!(classification, "leak");
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn rpki_generic_invalid_does_not_escalate_to_hijack_or_leak() {
        // Realistic raw reason text a naive keyword match against "reason"
        // would have misfired on ("as" appears in "has"); classification
        // correctly keeps this out of the hijack/leak branches.
        let r = row(
            "rpki",
            "high",
            "Generic invalid",
            serde_json::json!({"reason": "route has no covering VRP", "validator_state": "invalid", "rpki_description": "Generic invalid"}),
        );
        let members = vec![&r];
        let (classification, severity) = decide(&members);
        assert_eq!(classification, "invalid");
        assert_eq!(severity, Severity::High);
    }

    #[test]
    fn two_distinct_sources_without_rpki_is_suspicious_medium() {
        let heur = row("heuristic", "medium", "churn_spike", serde_json::json!({}));
        let ml = row("ml_anomaly", "medium", "anomaly", serde_json::json!({}));
        let members = vec![&heur, &ml];
        let (classification, severity) = decide(&members);
        assert_eq!(classification, "suspicious");
        assert_eq!(severity, Severity::Medium);
    }

    #[test]
    fn single_low_severity_source_is_normal() {
        let ml = row("ml_anomaly", "low", "anomaly", serde_json::json!({}));
        let members = vec![&ml];
        let (classification, severity) = decide(&members);
        assert_eq!(classification, "normal");
        assert_eq!(severity, Severity::Low);
    }
}
