//! Deterministic identity helpers: stable UUIDs for peers and path
//! attributes, and detection ids for each detector family.
//!
//! Grounded on `examples/original_source/main.py`
//! (`deterministic_peer_uuid`, `get_or_create_base_attrs`) and
//! `heuristic_detector.py` / `ml_inference_service.py`'s
//! `generate_detection_id`.

use chrono::NaiveDateTime;
use ipnetwork::IpNetwork;
use sha1::{Digest as Sha1Digest, Sha1};
#[allow(unused_imports)]
use sha2::{Digest as Sha2Digest, Sha256};
use uuid::Uuid;

/// SHA1(peer|peer_asn) truncated to 32 hex chars, parsed as a UUID.
pub fn peer_uuid(peer_addr: &str, peer_asn: i64) -> Uuid {
    let key = format!("{peer_addr}|{peer_asn}");
    uuid_from_sha1_prefix(&key)
}

/// SHA1(as_path|origin_as|next_hop) truncated to 32 hex chars.
pub fn base_attrs_uuid(as_path: &[i64], origin_as: i64, next_hop: Option<&str>) -> Uuid {
    let path_repr = format_as_path(as_path);
    let key = format!("{path_repr}|{origin_as}|{}", next_hop.unwrap_or(""));
    uuid_from_sha1_prefix(&key)
}

/// Mirrors Python's `str(list)` repr for an AS path, e.g. `[65000, 174]`.
fn format_as_path(as_path: &[i64]) -> String {
    let joined = as_path
        .iter()
        .map(|asn| asn.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}

fn uuid_from_sha1_prefix(input: &str) -> Uuid {
    let digest = Sha1::digest(input.as_bytes());
    let hex = hex_encode(&digest);
    Uuid::parse_str(&hex[..32]).expect("sha1 hex prefix is always a valid uuid")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `heur_<sha256(...)[:32]>`
pub fn heuristic_detection_id(window_start: NaiveDateTime, prefix: &IpNetwork, origin_as: i64) -> String {
    let key = format!(
        "heuristic_{}_{}_{}",
        iso_no_offset(window_start),
        prefix,
        origin_as
    );
    let digest = Sha256::digest(key.as_bytes());
    format!("heur_{}", &hex_encode(&digest)[..32])
}

/// `ml_<sha256(...)[:16]>`
pub fn ml_detection_id(window_start: NaiveDateTime, prefix: &IpNetwork, origin_as: i64) -> String {
    let key = format!("{}|{}|{}", iso_no_offset(window_start), prefix, origin_as);
    let digest = Sha256::digest(key.as_bytes());
    format!("ml_{}", &hex_encode(&digest)[..16])
}

/// Unlike the other two detectors, RPKI identity is a literal template
/// (no hashing): `rpki_<window_start as %Y%m%d%H%M%S>_<prefix>_<origin_as>`.
pub fn rpki_detection_id(window_start: NaiveDateTime, prefix: &IpNetwork, origin_as: i64) -> String {
    format!("rpki_{}_{}_{}", window_start.format("%Y%m%d%H%M%S"), prefix, origin_as)
}

fn iso_no_offset(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peer_uuid_is_deterministic() {
        let a = peer_uuid("185.1.2.3", 65000);
        let b = peer_uuid("185.1.2.3", 65000);
        assert_eq!(a, b);
    }

    #[test]
    fn peer_uuid_differs_by_asn() {
        assert_ne!(peer_uuid("185.1.2.3", 65000), peer_uuid("185.1.2.3", 65001));
    }

    #[test]
    fn base_attrs_uuid_is_deterministic() {
        let a = base_attrs_uuid(&[65000, 174], 174, Some("192.0.2.1"));
        let b = base_attrs_uuid(&[65000, 174], 174, Some("192.0.2.1"));
        assert_eq!(a, b);
    }

    #[test]
    fn detection_ids_use_expected_prefixes() {
        let ts = NaiveDateTime::parse_from_str("2026-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let prefix: IpNetwork = "198.51.100.0/24".parse().unwrap();
        assert!(heuristic_detection_id(ts, &prefix, 65000).starts_with("heur_"));
        assert!(ml_detection_id(ts, &prefix, 65000).starts_with("ml_"));
        assert!(rpki_detection_id(ts, &prefix, 65000).starts_with("rpki_"));
    }
}
