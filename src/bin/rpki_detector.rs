//! RPKI detector entry point: validates (origin_as, prefix) pairs against
//! an external RPKI validator.

use bgp_anomaly::config::{DbConfig, RpkiConfig};
use bgp_anomaly::detectors::rpki;

#[tokio::main]
async fn main() {
    bgp_anomaly::init_logging();

    let cfg = RpkiConfig::from_env();
    let db_cfg = DbConfig::from_env();

    if let Err(e) = rpki::run(&cfg, &db_cfg).await {
        log::error!("rpki detector exited: {e}");
        std::process::exit(1);
    }
}
