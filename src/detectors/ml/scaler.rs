//! Per-feature standardization, equivalent in role to the original's
//! `sklearn.preprocessing.StandardScaler`.

use serde::{Deserialize, Serialize};

pub const FEATURE_COLUMNS: [&str; 9] = [
    "announcements",
    "withdrawals",
    "total_updates",
    "withdrawal_ratio",
    "flap_count",
    "path_length",
    "unique_peers",
    "message_rate",
    "session_resets",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: [f64; 9],
    pub std: [f64; 9],
}

impl FeatureScaler {
    pub fn transform(&self, features: &[f64; 9]) -> [f64; 9] {
        let mut out = [0.0; 9];
        for i in 0..9 {
            let std = if self.std[i] > 0.0 { self.std[i] } else { 1.0 };
            out[i] = (features[i] - self.mean[i]) / std;
        }
        out
    }
}
