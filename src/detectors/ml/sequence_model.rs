//! A one-step-ahead linear forecaster standing in for the original's
//! pretrained Keras LSTM (see DESIGN.md's "ML artifact representation"
//! decision). `predict` forecasts the last timestep of a sequence from the
//! timesteps before it; the caller compares that forecast against the
//! actual last timestep the same way the original computes reconstruction
//! MSE.

use serde::{Deserialize, Serialize};

const FEATURES: usize = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceArtifact {
    /// One weight vector per (feature, lag) pair, flattened
    /// `[sequence_length - 1][FEATURES][FEATURES]`-shaped as a flat array,
    /// plus a bias per output feature.
    pub weights: Vec<f64>,
    pub bias: [f64; FEATURES],
    pub sequence_length: usize,
}

impl SequenceArtifact {
    /// `sequence` holds `sequence_length` standardized feature vectors in
    /// time order; predicts the feature vector for the timestep after the
    /// last one in `sequence[..sequence_length - 1]`.
    pub fn predict(&self, sequence: &[[f64; FEATURES]]) -> [f64; FEATURES] {
        let lags = self.sequence_length.saturating_sub(1);
        let mut out = self.bias;
        for lag in 0..lags.min(sequence.len().saturating_sub(1)) {
            let x = &sequence[lag];
            for out_f in 0..FEATURES {
                for in_f in 0..FEATURES {
                    let idx = lag * FEATURES * FEATURES + out_f * FEATURES + in_f;
                    out[out_f] += self.weights[idx] * x[in_f];
                }
            }
        }
        out
    }
}

pub fn mse(actual: &[f64; FEATURES], predicted: &[f64; FEATURES]) -> f64 {
    actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / FEATURES as f64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_weights_predict_last_seen_value() {
        let lags = 2;
        let mut weights = vec![0.0; lags * FEATURES * FEATURES];
        // sequence[1] (most recent input timestep) is identity, sequence[0] contributes nothing.
        for f in 0..FEATURES {
            weights[FEATURES * FEATURES + f * FEATURES + f] = 1.0;
        }
        let artifact = SequenceArtifact { weights, bias: [0.0; FEATURES], sequence_length: lags + 1 };

        let seq = [[1.0; FEATURES], [2.0; FEATURES], [3.0; FEATURES]];
        let predicted = artifact.predict(&seq);
        assert_eq!(predicted, seq[1]);
        assert!(mse(&seq[2], &predicted) > 0.0);
    }
}
