//! RPKI Detector: queries an external RPKI validator over HTTP and maps
//! its verdict to a detection. Grounded on spec.md §4.5 — the Python stub
//! `rpki_validator_service.py` carries no logic beyond its docstring, so
//! this module follows the spec directly.

use crate::config::{DbConfig, RpkiConfig};
use crate::db;
use crate::error::{AppError, RpkiError};
use crate::identity;
use crate::models::{Detection, DetectionMetadata, EventType, FeatureRow, RpkiMeta, Severity};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use sqlx::PgPool;
use std::time::Duration;

const STATE_TABLE: &str = "rpki_detector_state";

#[derive(Debug, Deserialize)]
struct ValidityResponse {
    validated_route: ValidatedRoute,
}

#[derive(Debug, Deserialize)]
struct ValidatedRoute {
    validity: Validity,
    #[serde(default)]
    vrps: Option<Vrps>,
}

#[derive(Debug, Deserialize)]
struct Validity {
    state: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Vrps {
    #[serde(default)]
    matched: Vec<Vrp>,
    #[serde(default)]
    unmatched: Vec<Vrp>,
}

#[derive(Debug, Deserialize)]
struct Vrp {
    asn: i64,
    #[serde(default)]
    max_length: Option<i64>,
}

pub async fn run(cfg: &RpkiConfig, db_cfg: &DbConfig) -> Result<(), AppError> {
    let pool = db::connect(db_cfg).await?;
    db::ensure_schema(&pool, "rpki_detector").await?;

    let client = reqwest::Client::builder()
        .timeout(cfg.timeout)
        .build()
        .map_err(RpkiError::Http)?;

    startup_probe(&client, cfg).await?;

    loop {
        if let Err(e) = tick(&pool, &client, cfg).await {
            log::error!("Error in RPKI detector loop: {e}");
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

/// Validates RIPE NCC's own well-known announcement (AS3333,
/// 193.0.0.0/21) as a startup liveness check against the validator,
/// within a 60s deadline.
async fn startup_probe(client: &reqwest::Client, cfg: &RpkiConfig) -> Result<(), AppError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        match validate(client, cfg, 3333, "193.0.0.0", 21).await {
            Ok(_) => {
                log::info!("[OK] RPKI validator reachable");
                return Ok(());
            }
            Err(e) => {
                log::warn!("RPKI validator startup probe failed: {e}");
                if tokio::time::Instant::now() >= deadline {
                    return Err(RpkiError::StartupProbeFailed.into());
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn validate(
    client: &reqwest::Client,
    cfg: &RpkiConfig,
    asn: i64,
    prefix_addr: &str,
    prefix_len: u8,
) -> Result<ValidatedRoute, RpkiError> {
    let url = format!(
        "{}/api/v1/validity/{}/{}/{}",
        cfg.validator_base_url, asn, prefix_addr, prefix_len
    );

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let resp = client.get(&url).send().await;
        match resp {
            Ok(r) if r.status().as_u16() == 503 && attempt <= cfg.max_retries => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            Ok(r) => {
                let body: ValidityResponse = r.json().await?;
                return Ok(body.validated_route);
            }
            Err(e) if attempt <= cfg.max_retries => {
                log::warn!("RPKI validator request failed (attempt {attempt}): {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn tick(pool: &PgPool, client: &reqwest::Client, cfg: &RpkiConfig) -> Result<(), crate::error::DbError> {
    let now = chrono::Utc::now().naive_utc();
    let last_ts = db::read_checkpoint(pool, STATE_TABLE, now, chrono::Duration::minutes(10)).await?;

    let rows = fetch_new_feature_rows(pool, last_ts).await?;
    if rows.is_empty() {
        return Ok(());
    }

    let mut latest_window = last_ts;
    let mut inserted = 0i64;
    for row in &rows {
        latest_window = latest_window.max(row.window_start);
        let Some((addr, len)) = split_prefix(&row.prefix) else { continue };
        match validate(client, cfg, row.origin_as, &addr, len).await {
            Ok(route) => {
                if let Some(detection) = build_detection(row, &route, len) {
                    db::insert_detection_immutable(pool, &detection).await?;
                    inserted += 1;
                }
            }
            Err(e) => log::error!("RPKI validation failed for {}: {e}", row.prefix),
        }
    }

    log::info!("Inserted {inserted} RPKI detections");
    db::advance_checkpoint(pool, STATE_TABLE, latest_window, rows.len() as i64).await?;
    Ok(())
}

fn split_prefix(prefix: &IpNetwork) -> Option<(String, u8)> {
    Some((prefix.ip().to_string(), prefix.prefix()))
}

async fn fetch_new_feature_rows(
    pool: &PgPool,
    last_ts: chrono::NaiveDateTime,
) -> Result<Vec<FeatureRow>, crate::error::DbError> {
    let raw: Vec<(
        chrono::NaiveDateTime,
        chrono::NaiveDateTime,
        IpNetwork,
        i64,
        i32,
        i32,
        i32,
        Option<f64>,
        i32,
    )> = sqlx::query_as(
        "SELECT window_start, window_end, prefix, origin_as, announcements, withdrawals, \
         unique_peers, path_length, session_resets \
         FROM public.bgp_features_1min WHERE window_start > $1 ORDER BY window_start, prefix, origin_as",
    )
    .bind(last_ts)
    .fetch_all(pool)
    .await?;

    Ok(raw
        .into_iter()
        .map(
            |(window_start, window_end, prefix, origin_as, announcements, withdrawals, unique_peers, path_length, session_resets)| {
                FeatureRow { window_start, window_end, prefix, origin_as, announcements, withdrawals, unique_peers, path_length, session_resets }
            },
        )
        .collect())
}

fn combined_score_for(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 10.0,
        Severity::High => 7.0,
        Severity::Medium => 5.0,
        Severity::Low => 2.0,
    }
}

/// Maps the validator's verdict to a severity/classification per spec.md
/// §4.5's decision table. Returns `None` for a plain "valid" result — no
/// detection row is written for routine, RPKI-confirmed routes.
fn build_detection(row: &FeatureRow, route: &ValidatedRoute, prefix_len: u8) -> Option<Detection> {
    let state = route.validity.state.as_str();
    let reason = route.validity.reason.clone().unwrap_or_default();
    let reason_lower = reason.to_ascii_lowercase();

    let (severity, classification) = match state {
        "valid" => return None,
        "invalid" => {
            let exceeds_maxlength = route
                .vrps
                .as_ref()
                .map(|v| v.matched.iter().chain(v.unmatched.iter()).any(|vrp| {
                    vrp.max_length.map(|ml| prefix_len as i64 > ml).unwrap_or(false)
                }))
                .unwrap_or(false);

            if reason_lower.contains("as") || reason_lower.contains("origin") {
                (Severity::Critical, "Origin-AS mismatch (hijack signal)")
            } else if (reason_lower.contains("length") || reason_lower.contains("max")) && exceeds_maxlength {
                (Severity::High, "MaxLength violation (leak/config)")
            } else {
                (Severity::High, "Generic invalid")
            }
        }
        _ => (Severity::Low, "Informational"),
    };

    let covering_roas = route
        .vrps
        .as_ref()
        .map(|v| {
            v.matched
                .iter()
                .map(|vrp| format!("AS{}/{}", vrp.asn, vrp.max_length.unwrap_or(prefix_len as i64)))
                .collect()
        })
        .unwrap_or_default();

    let metadata = RpkiMeta {
        validator_state: state.to_string(),
        reason: route.validity.reason.clone(),
        rpki_description: classification.to_string(),
        covering_roas,
    };

    Some(Detection {
        detection_id: identity::rpki_detection_id(row.window_start, &row.prefix, row.origin_as),
        timestamp: row.window_start,
        prefix: row.prefix,
        origin_as: row.origin_as,
        event_type: EventType::Rpki,
        combined_score: combined_score_for(severity),
        combined_severity: severity,
        rpki_status: Some(state.to_string()),
        classification: classification.to_string().into(),
        metadata: DetectionMetadata::Rpki(metadata),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn route(state: &str, reason: Option<&str>) -> ValidatedRoute {
        ValidatedRoute {
            validity: Validity { state: state.to_string(), reason: reason.map(|s| s.to_string()) },
            vrps: None,
        }
    }

    #[test]
    fn valid_route_produces_no_detection() {
        let row = sample_row();
        assert!(build_detection(&row, &route("valid", None), 24).is_none());
    }

    #[test]
    fn origin_mismatch_is_critical() {
        let row = sample_row();
        let d = build_detection(&row, &route("invalid", Some("origin as mismatch")), 24).unwrap();
        assert_eq!(d.combined_severity, Severity::Critical);
        assert_eq!(d.combined_score, 10.0);
    }

    #[test]
    fn generic_invalid_is_high() {
        let row = sample_row();
        let d = build_detection(&row, &route("invalid", Some("unspecified")), 24).unwrap();
        assert_eq!(d.combined_severity, Severity::High);
    }

    #[test]
    fn not_found_is_low_informational() {
        let row = sample_row();
        let d = build_detection(&row, &route("not-found", None), 24).unwrap();
        assert_eq!(d.combined_severity, Severity::Low);
        assert_eq!(d.combined_score, 2.0);
    }

    #[test]
    fn detection_id_uses_literal_timestamp_template() {
        let row = sample_row();
        let d = build_detection(&row, &route("invalid", Some("origin as mismatch")), 24).unwrap();
        assert!(d.detection_id.starts_with("rpki_20260101000000_"));
    }

    fn sample_row() -> FeatureRow {
        FeatureRow {
            window_start: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            window_end: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:01:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            prefix: "198.51.100.0/24".parse().unwrap(),
            origin_as: 65000,
            announcements: 1,
            withdrawals: 0,
            unique_peers: 1,
            path_length: Some(4.0),
            session_resets: 0,
        }
    }
}
