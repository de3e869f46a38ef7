//! Heuristic detector entry point: rule-based scoring over fresh feature
//! windows (churn, flapping, bogon ASNs/prefixes, path inflation, ...).

use bgp_anomaly::config::{DbConfig, HeuristicConfig};
use bgp_anomaly::detectors::heuristic;

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = HeuristicConfig::from_env();
    let db_cfg = DbConfig::from_env();

    if let Err(e) = heuristic::run(&cfg, &db_cfg).await {
        log::error!("heuristic detector exited: {e}");
        std::process::exit(1);
    }
}
