//! Nine fixed-threshold rules over `bgp_features_1min` rows. Grounded on
//! `examples/original_source/services/heuristic_detector.py` in full —
//! thresholds, bogon tables, scores and classification strings are kept
//! verbatim.

use crate::config::{DbConfig, HeuristicConfig};
use crate::db;
use crate::error::AppError;
use crate::identity;
use crate::models::{
    Detection, DetectionMetadata, EventType, FeatureRow, HeuristicMeta, Severity, TriggeredRule,
};
use ipnetwork::IpNetwork;
use sqlx::PgPool;

const VERSION: &str = "v1.0";
const STATE_TABLE: &str = "heuristic_inference_state";

mod thresholds {
    pub const CHURN_MODERATE: f64 = 1212.0;
    pub const CHURN_SEVERE: f64 = 6012.0;
    pub const CHURN_CRITICAL: f64 = 24000.0;

    pub const FLAP_MEDIUM: f64 = 132.0;
    pub const FLAP_HIGH: f64 = 372.0;
    pub const FLAP_CRITICAL: f64 = 1200.0;

    pub const PATH_LENGTH_MILD: f64 = 16.0;
    pub const PATH_LENGTH_SEVERE: f64 = 25.0;

    pub const WITHDRAWAL_RATIO_HIGH: f64 = 0.70;
    pub const WITHDRAWAL_RATIO_CRITICAL: f64 = 0.90;

    pub const PATH_INFLATION_HIGH: f64 = 5.0;
    pub const PATH_INFLATION_CRITICAL: f64 = 10.0;

    pub const VOLUME_SPIKE_HIGH: f64 = 100_000.0;
    pub const VOLUME_SPIKE_CRITICAL: f64 = 500_000.0;

    pub const SESSION_RESETS_MEDIUM: i32 = 6;
    pub const SESSION_RESETS_HIGH: i32 = 11;
    pub const SESSION_RESETS_CRITICAL: i32 = 50;
}

/// RFC 6996 private-use ASN ranges.
const BOGON_ASN_RANGES: &[(i64, i64)] = &[(64512, 65534), (4_200_000_000, 4_294_967_294)];

const BOGON_PREFIXES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
];

pub async fn run(cfg: &HeuristicConfig, db_cfg: &DbConfig) -> Result<(), AppError> {
    let pool = db::connect(db_cfg).await?;
    db::ensure_schema(&pool, "heuristic_detector").await?;

    log::info!("Starting Heuristic Detector Service");
    log::info!("Poll interval: {:?}, version: {VERSION}", cfg.poll_interval);

    loop {
        if let Err(e) = tick(&pool).await {
            log::error!("Error in processing loop: {e}");
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

async fn tick(pool: &PgPool) -> Result<(), crate::error::DbError> {
    let now = chrono::Utc::now().naive_utc();
    let last_ts = db::read_checkpoint(pool, STATE_TABLE, now, chrono::Duration::minutes(10)).await?;

    let rows = fetch_new_feature_rows(pool, last_ts).await?;
    if rows.is_empty() {
        log::info!("No new feature rows to process");
        return Ok(());
    }
    log::info!("Fetched {} new feature rows", rows.len());

    let mut detection_count = 0;
    let mut latest_window = last_ts;
    for row in &rows {
        latest_window = latest_window.max(row.window_start);
        let hits = apply_heuristics(row, pool).await;
        if hits.is_empty() {
            continue;
        }
        let detection = build_detection(row, &hits);
        db::insert_detection(pool, &detection).await?;
        detection_count += 1;
    }

    log::info!("Inserted {detection_count} heuristic detections");
    db::advance_checkpoint(pool, STATE_TABLE, latest_window, rows.len() as i64).await?;
    Ok(())
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
                FeatureRow {
                    window_start,
                    window_end,
                    prefix,
                    origin_as,
                    announcements,
                    withdrawals,
                    unique_peers,
                    path_length,
                    session_resets,
                }
            },
        )
        .collect())
}

pub struct HeuristicHit {
    pub rule_name: &'static str,
    pub severity: Severity,
    pub score: f64,
    pub reason: String,
}

pub fn check_churn(row: &FeatureRow) -> Option<HeuristicHit> {
    let total_updates = row.total_updates();
    let churn_per_hour = total_updates as f64 * 60.0;

    if churn_per_hour > thresholds::CHURN_CRITICAL {
        Some(HeuristicHit {
            rule_name: "churn_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("total_updates={total_updates} ({churn_per_hour:.0}/hr) exceeds critical threshold"),
        })
    } else if churn_per_hour > thresholds::CHURN_SEVERE {
        Some(HeuristicHit {
            rule_name: "churn_severe",
            severity: Severity::High,
            score: 0.8,
            reason: format!("total_updates={total_updates} ({churn_per_hour:.0}/hr) exceeds severe threshold"),
        })
    } else if churn_per_hour > thresholds::CHURN_MODERATE {
        Some(HeuristicHit {
            rule_name: "churn_moderate",
            severity: Severity::Medium,
            score: 0.6,
            reason: format!("total_updates={total_updates} ({churn_per_hour:.0}/hr) exceeds moderate threshold"),
        })
    } else {
        None
    }
}

pub fn check_withdrawal_ratio(row: &FeatureRow) -> Option<HeuristicHit> {
    let ratio = row.withdrawal_ratio();
    let withdrawals_per_hour = row.withdrawals as f64 * 60.0;

    if ratio >= thresholds::WITHDRAWAL_RATIO_CRITICAL && withdrawals_per_hour > 300.0 {
        Some(HeuristicHit {
            rule_name: "withdrawal_storm_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("withdrawal_ratio={ratio:.2}, withdrawals_per_hour={withdrawals_per_hour:.0} - withdrawal storm detected"),
        })
    } else if ratio >= thresholds::WITHDRAWAL_RATIO_HIGH && withdrawals_per_hour > 600.0 {
        Some(HeuristicHit {
            rule_name: "withdrawal_storm_high",
            severity: Severity::High,
            score: 0.8,
            reason: format!("withdrawal_ratio={ratio:.2}, withdrawals_per_hour={withdrawals_per_hour:.0} - high withdrawal activity"),
        })
    } else {
        None
    }
}

pub fn check_flapping(row: &FeatureRow) -> Option<HeuristicHit> {
    let flap_count = row.flap_count();
    let flap_per_hour = flap_count as f64 * 60.0;

    if flap_per_hour > thresholds::FLAP_CRITICAL {
        Some(HeuristicHit {
            rule_name: "flap_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("flap_count={flap_count} ({flap_per_hour:.0}/hr) exceeds critical threshold"),
        })
    } else if flap_per_hour > thresholds::FLAP_HIGH {
        Some(HeuristicHit {
            rule_name: "flap_high",
            severity: Severity::High,
            score: 0.8,
            reason: format!("flap_count={flap_count} ({flap_per_hour:.0}/hr) exceeds high threshold"),
        })
    } else if flap_per_hour > thresholds::FLAP_MEDIUM {
        Some(HeuristicHit {
            rule_name: "flap_medium",
            severity: Severity::Medium,
            score: 0.6,
            reason: format!("flap_count={flap_count} ({flap_per_hour:.0}/hr) exceeds medium threshold"),
        })
    } else {
        None
    }
}

pub fn check_path_length(row: &FeatureRow) -> Option<HeuristicHit> {
    let path_length = row.path_length?;
    if path_length > thresholds::PATH_LENGTH_SEVERE {
        Some(HeuristicHit {
            rule_name: "path_length_severe",
            severity: Severity::High,
            score: 0.85,
            reason: format!("path_length={path_length:.1} exceeds severe threshold"),
        })
    } else if path_length > thresholds::PATH_LENGTH_MILD {
        Some(HeuristicHit {
            rule_name: "path_length_mild",
            severity: Severity::Medium,
            score: 0.6,
            reason: format!("path_length={path_length:.1} exceeds mild threshold"),
        })
    } else {
        None
    }
}

pub fn check_bogon_asn(row: &FeatureRow) -> Option<HeuristicHit> {
    let origin_as = row.origin_as;
    for (start, end) in BOGON_ASN_RANGES {
        if *start <= origin_as && origin_as <= *end {
            return Some(HeuristicHit {
                rule_name: "bogon_asn_critical",
                severity: Severity::Critical,
                score: 0.95,
                reason: format!("origin_as={origin_as} is in private/reserved range [{start}-{end}]"),
            });
        }
    }
    None
}

pub fn check_bogon_prefix(row: &FeatureRow) -> Option<HeuristicHit> {
    for bogon_str in BOGON_PREFIXES {
        let bogon: IpNetwork = bogon_str.parse().ok()?;
        if networks_overlap(&row.prefix, &bogon) {
            return Some(HeuristicHit {
                rule_name: "bogon_prefix_critical",
                severity: Severity::Critical,
                score: 0.95,
                reason: format!("prefix={} overlaps with bogon range {bogon_str}", row.prefix),
            });
        }
    }
    None
}

fn networks_overlap(a: &IpNetwork, b: &IpNetwork) -> bool {
    match (a, b) {
        (IpNetwork::V4(a), IpNetwork::V4(b)) => a.contains(b.ip()) || b.contains(a.ip()),
        (IpNetwork::V6(a), IpNetwork::V6(b)) => a.contains(b.ip()) || b.contains(a.ip()),
        _ => false,
    }
}

pub async fn check_path_inflation(row: &FeatureRow, pool: &PgPool) -> Option<HeuristicHit> {
    let current_path = row.path_length?;

    let baseline: Option<(Option<f64>,)> = sqlx::query_as(
        "SELECT AVG(path_length) FROM public.bgp_features_1min \
         WHERE prefix = $1 AND origin_as = $2 \
         AND window_start BETWEEN $3 - INTERVAL '7 days' AND $3 - INTERVAL '1 hour' \
         AND path_length IS NOT NULL",
    )
    .bind(row.prefix)
    .bind(row.origin_as)
    .bind(row.window_start)
    .fetch_optional(pool)
    .await
    .ok()?;

    let baseline_path = baseline?.0?;
    let delta = current_path - baseline_path;

    if delta > thresholds::PATH_INFLATION_CRITICAL {
        Some(HeuristicHit {
            rule_name: "path_inflation_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("path_length={current_path:.1}, baseline={baseline_path:.1}, delta={delta:.1} - possible path poisoning"),
        })
    } else if delta > thresholds::PATH_INFLATION_HIGH {
        Some(HeuristicHit {
            rule_name: "path_inflation_high",
            severity: Severity::High,
            score: 0.8,
            reason: format!("path_length={current_path:.1}, baseline={baseline_path:.1}, delta={delta:.1} - suspicious path change"),
        })
    } else {
        None
    }
}

pub fn check_volume_spike(row: &FeatureRow) -> Option<HeuristicHit> {
    let message_rate = row.message_rate();
    if message_rate > thresholds::VOLUME_SPIKE_CRITICAL {
        Some(HeuristicHit {
            rule_name: "volume_spike_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("message_rate={message_rate:.0} msg/min exceeds critical threshold"),
        })
    } else if message_rate > thresholds::VOLUME_SPIKE_HIGH {
        Some(HeuristicHit {
            rule_name: "volume_spike_high",
            severity: Severity::High,
            score: 0.85,
            reason: format!("message_rate={message_rate:.0} msg/min exceeds high threshold"),
        })
    } else {
        None
    }
}

pub fn check_session_resets(row: &FeatureRow) -> Option<HeuristicHit> {
    let session_resets = row.session_resets;
    if session_resets > thresholds::SESSION_RESETS_CRITICAL {
        Some(HeuristicHit {
            rule_name: "session_resets_critical",
            severity: Severity::Critical,
            score: 0.95,
            reason: format!("session_resets={session_resets} exceeds critical threshold - DoS-level issue"),
        })
    } else if session_resets >= thresholds::SESSION_RESETS_HIGH {
        Some(HeuristicHit {
            rule_name: "session_resets_high",
            severity: Severity::High,
            score: 0.85,
            reason: format!("session_resets={session_resets} exceeds high threshold - persistent instability"),
        })
    } else if session_resets >= thresholds::SESSION_RESETS_MEDIUM {
        Some(HeuristicHit {
            rule_name: "session_resets_medium",
            severity: Severity::Medium,
            score: 0.6,
            reason: format!("session_resets={session_resets} exceeds medium threshold - investigate"),
        })
    } else {
        None
    }
}

pub async fn apply_heuristics(row: &FeatureRow, pool: &PgPool) -> Vec<HeuristicHit> {
    let mut hits = Vec::new();
    hits.extend(check_churn(row));
    hits.extend(check_withdrawal_ratio(row));
    hits.extend(check_flapping(row));
    hits.extend(check_path_length(row));
    hits.extend(check_bogon_asn(row));
    hits.extend(check_bogon_prefix(row));
    hits.extend(check_path_inflation(row, pool).await);
    hits.extend(check_volume_spike(row));
    hits.extend(check_session_resets(row));
    hits
}

pub fn determine_classification(hits: &[HeuristicHit]) -> String {
    if hits.len() > 1 {
        return "multi_rule".to_string();
    }
    let name = hits[0].rule_name;
    if name.contains("churn") {
        "churn_spike"
    } else if name.contains("withdrawal") {
        "withdrawal_burst"
    } else if name.contains("path_inflation") {
        "path_inflation"
    } else if name.contains("flap") {
        "route_flap"
    } else if name.contains("path_length") {
        "path_anomaly"
    } else if name.contains("bogon_asn") {
        "bogon_asn"
    } else if name.contains("bogon_prefix") {
        "bogon_prefix"
    } else if name.contains("volume_spike") {
        "volume_spike"
    } else if name.contains("session_resets") {
        "session_instability"
    } else {
        "unknown"
    }
    .to_string()
}

pub fn get_max_severity(hits: &[HeuristicHit]) -> Severity {
    hits.iter().map(|h| h.severity).max().expect("hits non-empty")
}

fn build_detection(row: &FeatureRow, hits: &[HeuristicHit]) -> Detection {
    let heuristic_score = hits.iter().map(|h| h.score).fold(0.0, f64::max);
    let severity = get_max_severity(hits);
    let classification = determine_classification(hits);

    let metadata = HeuristicMeta {
        triggered_rules: hits
            .iter()
            .map(|h| TriggeredRule {
                rule_name: h.rule_name.to_string(),
                severity: h.severity,
                score: h.score,
                reason: h.reason.clone(),
            })
            .collect(),
        heuristic_score,
        detector_type: "HeuristicDetector".to_string(),
        version: VERSION.to_string(),
    };

    Detection {
        detection_id: identity::heuristic_detection_id(row.window_start, &row.prefix, row.origin_as),
        timestamp: row.window_start,
        prefix: row.prefix,
        origin_as: row.origin_as,
        event_type: EventType::Heuristic,
        combined_score: heuristic_score,
        combined_severity: severity,
        rpki_status: Some("unknown".to_string()),
        classification: classification.into(),
        metadata: DetectionMetadata::Heuristic(metadata),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(total_updates_each: i32, withdrawals: i32) -> FeatureRow {
        FeatureRow {
            window_start: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            window_end: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:01:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            prefix: "198.51.100.0/24".parse().unwrap(),
            origin_as: 65000,
            announcements: total_updates_each,
            withdrawals,
            unique_peers: 1,
            path_length: Some(4.0),
            session_resets: 0,
        }
    }

    #[test]
    fn churn_boundary_20_vs_21() {
        // 20 updates/min -> 1200/hr, not > 1212 moderate threshold.
        assert!(check_churn(&row(20, 0)).is_none());
        // 21 updates/min -> 1260/hr, exceeds moderate threshold.
        assert!(check_churn(&row(21, 0)).is_some());
    }

    #[test]
    fn bogon_asn_boundaries() {
        let mut r = row(1, 0);
        r.origin_as = 64511;
        assert!(check_bogon_asn(&r).is_none());
        r.origin_as = 64512;
        assert!(check_bogon_asn(&r).is_some());
        r.origin_as = 65534;
        assert!(check_bogon_asn(&r).is_some());
        r.origin_as = 65535;
        assert!(check_bogon_asn(&r).is_none());
    }

    #[test]
    fn bogon_prefix_detects_rfc1918() {
        let mut r = row(1, 0);
        r.prefix = "10.1.2.0/24".parse().unwrap();
        assert!(check_bogon_prefix(&r).is_some());
        r.prefix = "8.8.8.0/24".parse().unwrap();
        assert!(check_bogon_prefix(&r).is_none());
    }

    #[test]
    fn withdrawal_storm_needs_ratio_and_volume() {
        // Ratio 1.0 (fully withdrawals) but only 1/min -> 60/hr, below the
        // 300/hr volume floor, so it must not trigger despite the ratio.
        let r = row(0, 1);
        assert!(check_withdrawal_ratio(&r).is_none());
    }

    #[test]
    fn max_severity_picks_highest() {
        let hits = vec![
            HeuristicHit { rule_name: "a", severity: Severity::Medium, score: 0.5, reason: String::new() },
            HeuristicHit { rule_name: "b", severity: Severity::Critical, score: 0.9, reason: String::new() },
        ];
        assert_eq!(get_max_severity(&hits), Severity::Critical);
        assert_eq!(determine_classification(&hits), "multi_rule");
    }
}
