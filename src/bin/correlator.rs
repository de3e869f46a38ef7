//! Correlator entry point: fuses per-source detections into a final
//! classification and escalated severity.

use bgp_anomaly::config::{CorrelatorConfig, DbConfig};
use bgp_anomaly::correlator;

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = CorrelatorConfig::from_env();
    let db_cfg = DbConfig::from_env();

    if let Err(e) = correlator::run(&cfg, &db_cfg).await {
        log::error!("correlator exited: {e}");
        std::process::exit(1);
    }
}
