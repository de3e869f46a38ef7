//! A small, real isolation-forest scorer standing in for the original's
//! pretrained scikit-learn `IsolationForest` (see DESIGN.md's "ML artifact
//! representation" decision). Same sign convention as scikit-learn's
//! `decision_function`: negative values are anomalies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Node {
    Leaf { size: usize },
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn path_length(&self, x: &[f64; 9], depth: u32) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Internal { feature, threshold, left, right } => {
                if x[*feature] < *threshold {
                    left.path_length(x, depth + 1)
                } else {
                    right.path_length(x, depth + 1)
                }
            }
        }
    }
}

/// `c(n)`: expected path length of an unsuccessful BST search over `n`
/// points, the standard isolation-forest normalization constant.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (harmonic(n - 1.0) ) - (2.0 * (n - 1.0) / n)
}

fn harmonic(n: f64) -> f64 {
    // H(n) ~= ln(n) + euler-mascheroni constant, the asymptotic
    // approximation scikit-learn itself uses for n large.
    const EULER_MASCHERONI: f64 = 0.5772156649015329;
    n.ln() + EULER_MASCHERONI
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestArtifact {
    pub trees: Vec<Node>,
    pub training_sample_size: usize,
}

impl IsolationForestArtifact {
    pub fn score_samples(&self, x: &[f64; 9]) -> f64 {
        let avg_path: f64 =
            self.trees.iter().map(|t| t.path_length(x, 0)).sum::<f64>() / self.trees.len() as f64;
        let c = average_path_length(self.training_sample_size).max(1e-9);
        2f64.powf(-avg_path / c)
    }

    /// Mirrors `IsolationForest.decision_function`: `0.5 - score_samples`,
    /// negative for anomalies.
    pub fn decision_function(&self, x: &[f64; 9]) -> f64 {
        0.5 - self.score_samples(x)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn toy_forest() -> IsolationForestArtifact {
        // A single shallow tree splitting on "announcements" (feature 0):
        // low values isolate fast (short path -> anomalous), high values
        // isolate slowly (long path -> normal).
        let tree = Node::Internal {
            feature: 0,
            threshold: 5.0,
            left: Box::new(Node::Leaf { size: 1 }),
            right: Box::new(Node::Internal {
                feature: 0,
                threshold: 50.0,
                left: Box::new(Node::Leaf { size: 10 }),
                right: Box::new(Node::Leaf { size: 1 }),
            }),
        };
        IsolationForestArtifact { trees: vec![tree], training_sample_size: 256 }
    }

    #[test]
    fn shallow_path_scores_more_anomalous_than_deep_path() {
        let forest = toy_forest();
        let mut shallow = [0.0; 9];
        shallow[0] = 1.0; // isolates at depth 1 -> short path
        let mut deep = [0.0; 9];
        deep[0] = 20.0; // isolates at depth 2, bigger leaf -> longer path

        assert!(forest.decision_function(&shallow) < forest.decision_function(&deep));
    }
}
