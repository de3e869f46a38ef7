//! ML detector entry point: isolation-forest + sequence-forecast ensemble
//! scoring over fresh feature windows.

use bgp_anomaly::config::{DbConfig, DetectorConfig, ModelConfig};
use bgp_anomaly::detectors::ml;

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = DetectorConfig::from_env();
    let db_cfg = DbConfig::from_env();
    let model_cfg = ModelConfig::from_env();

    if let Err(e) = ml::run(&cfg, &db_cfg, &model_cfg).await {
        log::error!("ml detector exited: {e}");
        std::process::exit(1);
    }
}
