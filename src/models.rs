//! Shared domain types for the pipeline. See spec.md §3.

use chrono::NaiveDateTime;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub hash_id: Uuid,
    pub router_hash_id: Uuid,
    pub peer_addr: IpAddr,
    pub peer_asn: i64,
    pub isipv4: bool,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAttrs {
    pub hash_id: Uuid,
    pub peer_hash_id: Uuid,
    pub origin: String,
    pub as_path: Vec<i64>,
    pub as_path_count: i32,
    pub origin_as: i64,
    pub next_hop: Option<IpAddr>,
    pub nexthop_isipv4: bool,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub hash_id: Uuid,
    pub base_attr_hash_id: Uuid,
    pub peer_hash_id: Uuid,
    pub isipv4: bool,
    pub origin_as: i64,
    pub prefix: IpNetwork,
    pub timestamp: NaiveDateTime,
    pub first_added_timestamp: NaiveDateTime,
    pub iswithdrawn: bool,
}

/// One row of `bgp_features_1min`: the half-open window `(window_start,
/// window_end]`'s aggregated view of a single `(prefix, origin_as)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub prefix: IpNetwork,
    pub origin_as: i64,
    pub announcements: i32,
    pub withdrawals: i32,
    pub unique_peers: i32,
    pub path_length: Option<f64>,
    pub session_resets: i32,
}

impl FeatureRow {
    pub fn total_updates(&self) -> i32 {
        self.announcements + self.withdrawals
    }

    pub fn withdrawal_ratio(&self) -> f64 {
        self.withdrawals as f64 / (self.announcements.max(1)) as f64
    }

    pub fn flap_count(&self) -> i32 {
        (self.withdrawals + self.announcements) / 2
    }

    pub fn message_rate(&self) -> f64 {
        self.total_updates() as f64 / 60.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Heuristic,
    MlAnomaly,
    Rpki,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Heuristic => "heuristic",
            EventType::MlAnomaly => "ml_anomaly",
            EventType::Rpki => "rpki",
        };
        write!(f, "{s}")
    }
}

/// The correlator's final classification, per spec.md §4.6.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    Normal,
    Suspicious,
    Invalid,
    Hijack,
    Leak,
    /// Per-detector classifications that the correlator has not yet fused
    /// (e.g. a heuristic-only `bogon_asn`), kept verbatim until fusion.
    Other(String),
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Normal => "normal",
            Classification::Suspicious => "suspicious",
            Classification::Invalid => "invalid",
            Classification::Hijack => "hijack",
            Classification::Leak => "leak",
            Classification::Other(s) => s,
        };
        write!(f, "{s}")
    }
}

impl From<String> for Classification {
    fn from(s: String) -> Self {
        match s.as_str() {
            "normal" => Classification::Normal,
            "suspicious" => Classification::Suspicious,
            "invalid" => Classification::Invalid,
            "hijack" => Classification::Hijack,
            "leak" => Classification::Leak,
            _ => Classification::Other(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub rule_name: String,
    pub severity: Severity,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicMeta {
    pub triggered_rules: Vec<TriggeredRule>,
    pub heuristic_score: f64,
    pub detector_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlMeta {
    pub iso_score: f64,
    pub lstm_score: f64,
    pub z_iso: f64,
    pub z_lstm: f64,
    pub ensemble_method: String,
    pub model_version: String,
    pub feature_columns: Vec<String>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpkiMeta {
    pub validator_state: String,
    pub reason: Option<String>,
    /// Detector-computed, fixed-vocabulary description (e.g. "Origin-AS
    /// mismatch (hijack signal)") — unlike `reason`, which is the
    /// validator's raw free-text and unsafe to pattern-match on.
    pub rpki_description: String,
    pub covering_roas: Vec<String>,
}

/// Tagged sum type standing in for the original's free-form JSON
/// `metadata` column. See spec.md §9 "Dynamic metadata blobs".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "detector_type", rename_all = "PascalCase")]
pub enum DetectionMetadata {
    Heuristic(HeuristicMeta),
    Ml(MlMeta),
    Rpki(RpkiMeta),
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub detection_id: String,
    pub timestamp: NaiveDateTime,
    pub prefix: IpNetwork,
    pub origin_as: i64,
    pub event_type: EventType,
    pub combined_score: f64,
    pub combined_severity: Severity,
    pub rpki_status: Option<String>,
    pub classification: Classification,
    pub metadata: DetectionMetadata,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn feature_row_derives_invariants() {
        let row = FeatureRow {
            window_start: NaiveDateTime::parse_from_str("2026-01-01 00:00:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            window_end: NaiveDateTime::parse_from_str("2026-01-01 00:01:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            prefix: "198.51.100.0/24".parse().unwrap(),
            origin_as: 65000,
            announcements: 10,
            withdrawals: 5,
            unique_peers: 3,
            path_length: Some(4.0),
            session_resets: 0,
        };
        assert_eq!(row.total_updates(), 15);
        assert_eq!(row.flap_count(), 7);
        assert!((row.withdrawal_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn classification_roundtrips_through_string() {
        assert_eq!(Classification::from("hijack".to_string()), Classification::Hijack);
        assert_eq!(
            Classification::from("churn_spike".to_string()),
            Classification::Other("churn_spike".to_string())
        );
    }
}
