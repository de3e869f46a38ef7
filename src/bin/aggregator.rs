//! Feature aggregator entry point: rolls up raw RIB activity into 1-minute
//! per-(prefix, origin_as) feature windows.

use bgp_anomaly::config::{AggregatorConfig, DbConfig};

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = AggregatorConfig::from_env();
    let db_cfg = DbConfig::from_env();

    if let Err(e) = bgp_anomaly::run_aggregator(&cfg, &db_cfg).await {
        log::error!("aggregator exited: {e}");
        std::process::exit(1);
    }
}
