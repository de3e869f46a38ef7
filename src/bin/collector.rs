//! Collector entry point: streams RIS-Live UPDATE messages and persists
//! peers, path attributes, and RIB changes.

use bgp_anomaly::config::{CollectorConfig, DbConfig};

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = CollectorConfig::from_env();
    let db_cfg = DbConfig::from_env();

    if let Err(e) = bgp_anomaly::run_collector(&cfg, &db_cfg).await {
        log::error!("collector exited: {e}");
        std::process::exit(1);
    }
}
