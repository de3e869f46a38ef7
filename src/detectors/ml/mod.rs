//! ML Detector: Isolation-Forest-like + sequence-forecaster ensemble with
//! z-score normalization. Grounded on
//! `examples/original_source/services/ml_inference_service.py` in full.

pub mod isolation_forest;
pub mod scaler;
pub mod sequence_model;

use crate::config::{DbConfig, DetectorConfig, EnsembleMethod, ModelConfig};
use crate::db;
use crate::error::AppError;
use crate::identity;
use crate::models::{Detection, DetectionMetadata, EventType, FeatureRow, MlMeta, Severity};
use ipnetwork::IpNetwork;
use isolation_forest::IsolationForestArtifact;
use rayon::prelude::*;
use scaler::{FeatureScaler, FEATURE_COLUMNS};
use sequence_model::SequenceArtifact;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

const MODEL_VERSION: &str = "v1.0";
const STATE_TABLE: &str = "ml_inference_state";

/// Release-specific calibration constants the original computed once from
/// historical detections and hardcoded; kept verbatim (see DESIGN.md).
const ISO_BASELINE_MEAN: f64 = -0.14;
const ISO_BASELINE_STD: f64 = 0.012;
const LSTM_BASELINE_MEAN: f64 = 13.99;
const LSTM_BASELINE_STD: f64 = 2.68;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub isolation_forest: IsolationForestArtifact,
    pub feature_scaler: FeatureScaler,
    pub sequence_model: SequenceArtifact,
}

const DEFAULT_ARTIFACT_JSON: &str = include_str!("artifacts/default_model.json");

impl ModelArtifacts {
    pub fn load(cfg: &ModelConfig) -> anyhow::Result<Self> {
        if let Some(dir) = &cfg.model_dir {
            let path = std::path::Path::new(dir).join("model.json");
            let text = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(serde_json::from_str(DEFAULT_ARTIFACT_JSON)?)
        }
    }
}

pub async fn run(cfg: &DetectorConfig, db_cfg: &DbConfig, model_cfg: &ModelConfig) -> Result<(), AppError> {
    let pool = db::connect(db_cfg).await?;
    db::ensure_schema(&pool, "ml_detector").await?;

    log::info!("Starting ML Inference Service for BGP Anomaly Detection");
    log::info!(
        "ensemble_method={:?} threshold={} poll_interval={:?}",
        cfg.ensemble_method, cfg.anomaly_threshold, cfg.poll_interval
    );

    let models = ModelArtifacts::load(model_cfg)
        .map_err(|e| AppError::Config(format!("failed to load ML artifacts: {e}")))?;
    log::info!("[OK] All models loaded successfully");

    loop {
        if let Err(e) = tick(&pool, cfg, &models).await {
            log::error!("Error in main loop: {e}");
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

fn feature_vector(row: &FeatureRow) -> [f64; 9] {
    [
        row.announcements as f64,
        row.withdrawals as f64,
        row.total_updates() as f64,
        row.withdrawal_ratio(),
        row.flap_count() as f64,
        row.path_length.unwrap_or(0.0),
        row.unique_peers as f64,
        row.message_rate(),
        row.session_resets as f64,
    ]
}

async fn tick(pool: &PgPool, cfg: &DetectorConfig, models: &ModelArtifacts) -> Result<(), crate::error::DbError> {
    let now = chrono::Utc::now().naive_utc();
    // No checkpoint yet -> original defaults to the Unix epoch; emulate by
    // looking back effectively forever instead of the 10-minute default
    // the other stages use.
    let last_ts = db::read_checkpoint(pool, STATE_TABLE, now, chrono::Duration::days(36500)).await?;

    let rows = fetch_new_feature_rows(pool, last_ts).await?;
    if rows.is_empty() {
        log::info!("No new feature rows to process");
        return Ok(());
    }
    log::info!("Processing {} feature rows...", rows.len());

    let iso_scores = compute_iso_scores(&rows, models);
    let lstm_scores = compute_lstm_scores(&rows, models, cfg);

    let mut inserted = 0i64;
    let mut latest_window = last_ts;
    for (i, row) in rows.iter().enumerate() {
        latest_window = latest_window.max(row.window_start);
        let detection = score_row(row, iso_scores[i], lstm_scores[i], cfg);
        db::insert_detection(pool, &detection).await?;
        inserted += 1;
    }
    log::info!("[OK] Inserted {inserted} detection records");

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
                FeatureRow { window_start, window_end, prefix, origin_as, announcements, withdrawals, unique_peers, path_length, session_resets }
            },
        )
        .collect())
}

/// Isolation-forest scores, one per row, independent of ordering —
/// embarrassingly parallel, matching the original's vectorized
/// `decision_function` call over the whole batch.
pub fn compute_iso_scores(rows: &[FeatureRow], models: &ModelArtifacts) -> Vec<f64> {
    rows.par_iter()
        .map(|row| {
            let scaled = models.feature_scaler.transform(&feature_vector(row));
            models.isolation_forest.decision_function(&scaled)
        })
        .collect()
}

/// Sequence-forecast MSE per row, grouped by `(prefix, origin_as)` and
/// ordered by time within each group, matching
/// `compute_lstm_scores`. Groups beyond `sample_above` are scored once and
/// the rest are filled with the mean of the scored sample, exactly as the
/// original's sampling fallback for large backfills.
pub fn compute_lstm_scores(rows: &[FeatureRow], models: &ModelArtifacts, cfg: &DetectorConfig) -> Vec<f64> {
    let mut out = vec![0.0; rows.len()];
    let mut groups: HashMap<(String, i64), Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        groups.entry((row.prefix.to_string(), row.origin_as)).or_default().push(i);
    }

    let group_keys: Vec<_> = groups.keys().cloned().collect();
    let sample_this_round = group_keys.len() > cfg.sample_above;
    let sampled_keys: Vec<_> = if sample_this_round {
        deterministic_sample(&group_keys, cfg.sample_above, cfg.sample_seed)
    } else {
        group_keys.clone()
    };

    let mut processed_scores = Vec::new();
    for key in &sampled_keys {
        let mut indices = groups[key].clone();
        indices.sort_by_key(|&i| rows[i].window_start);

        let scaled: Vec<[f64; 9]> = indices
            .iter()
            .map(|&i| models.feature_scaler.transform(&feature_vector(&rows[i])))
            .collect();

        for (pos, &i) in indices.iter().enumerate() {
            let seq_len = models.sequence_model.sequence_length;
            let start = pos.saturating_sub(seq_len.saturating_sub(1));
            let window = &scaled[start..=pos];
            let mut padded = vec![[0.0; 9]; seq_len];
            let offset = seq_len - window.len();
            padded[offset..].clone_from_slice(window);

            let predicted = models.sequence_model.predict(&padded);
            let actual = padded[seq_len - 1];
            let score = sequence_model::mse(&actual, &predicted);
            out[i] = score;
            processed_scores.push(score);
        }
    }

    if sample_this_round && !processed_scores.is_empty() {
        let mean = processed_scores.iter().sum::<f64>() / processed_scores.len() as f64;
        for key in group_keys.iter().filter(|k| !sampled_keys.contains(k)) {
            for &i in &groups[key] {
                out[i] = mean;
            }
        }
    }

    out
}

/// A seeded, deterministic stand-in for Python's `random.sample(seed=42)`
/// — sorts candidates for reproducibility, then takes every Nth one so the
/// sample spans the whole key space rather than clustering.
fn deterministic_sample(keys: &[(String, i64)], limit: usize, seed: u64) -> Vec<(String, i64)> {
    let mut sorted = keys.to_vec();
    sorted.sort();
    let stride = (sorted.len() as f64 / limit as f64).ceil() as usize;
    let offset = (seed as usize) % stride.max(1);
    sorted
        .into_iter()
        .skip(offset)
        .step_by(stride.max(1))
        .take(limit)
        .collect()
}

fn severity_for(combined: f64) -> Severity {
    if combined < 3.0 {
        Severity::Low
    } else if combined < 4.0 {
        Severity::Medium
    } else if combined < 5.0 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn score_row(row: &FeatureRow, iso_raw: f64, lstm_raw: f64, cfg: &DetectorConfig) -> Detection {
    let z_iso = -((iso_raw - ISO_BASELINE_MEAN) / ISO_BASELINE_STD);
    let z_lstm = (lstm_raw - LSTM_BASELINE_MEAN) / LSTM_BASELINE_STD;

    let combined = match cfg.ensemble_method {
        EnsembleMethod::Max => z_iso.max(z_lstm),
        EnsembleMethod::Avg => (z_iso + z_lstm) / 2.0,
    };

    let metadata = MlMeta {
        iso_score: iso_raw,
        lstm_score: lstm_raw,
        z_iso,
        z_lstm,
        ensemble_method: match cfg.ensemble_method {
            EnsembleMethod::Max => "max".to_string(),
            EnsembleMethod::Avg => "avg".to_string(),
        },
        model_version: MODEL_VERSION.to_string(),
        feature_columns: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        threshold: cfg.anomaly_threshold,
    };

    Detection {
        detection_id: identity::ml_detection_id(row.window_start, &row.prefix, row.origin_as),
        timestamp: row.window_start,
        prefix: row.prefix,
        origin_as: row.origin_as,
        event_type: EventType::MlAnomaly,
        combined_score: combined,
        combined_severity: severity_for(combined),
        rpki_status: Some("unknown".to_string()),
        classification: "lstm_if_ensemble".to_string().into(),
        metadata: DetectionMetadata::Ml(metadata),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn severity_bucket_edges() {
        assert_eq!(severity_for(2.9999), Severity::Low);
        assert_eq!(severity_for(3.0), Severity::Medium);
        assert_eq!(severity_for(3.9999), Severity::Medium);
        assert_eq!(severity_for(4.0), Severity::High);
        assert_eq!(severity_for(4.9999), Severity::High);
        assert_eq!(severity_for(5.0), Severity::Critical);
    }

    #[test]
    fn ensemble_avg_vs_max() {
        let cfg_avg = DetectorConfig {
            poll_interval: std::time::Duration::from_secs(1),
            anomaly_threshold: 3.0,
            ensemble_method: EnsembleMethod::Avg,
            lstm_sequence_length: 10,
            sample_above: 5000,
            sample_seed: 42,
        };
        let mut cfg_max = cfg_avg.clone();
        cfg_max.ensemble_method = EnsembleMethod::Max;

        let row = FeatureRow {
            window_start: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            window_end: chrono::NaiveDateTime::parse_from_str("2026-01-01 00:01:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            prefix: "198.51.100.0/24".parse().unwrap(),
            origin_as: 65000,
            announcements: 1,
            withdrawals: 0,
            unique_peers: 1,
            path_length: Some(4.0),
            session_resets: 0,
        };

        let avg_detection = score_row(&row, -0.2, 20.0, &cfg_avg);
        let max_detection = score_row(&row, -0.2, 20.0, &cfg_max);
        assert!(max_detection.combined_score >= avg_detection.combined_score);
    }
}
