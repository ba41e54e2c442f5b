//! p3-bridge daemon entry point.
//!
//! Usage: `p3-bridge [config.json]`. The config path defaults to
//! `p3-bridge.json` in the working directory; a missing file runs with
//! defaults (TCP to 127.0.0.1:5403, delivery disabled).

use p3_bridge::{Bridge, Config};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "p3-bridge.json".to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(%config_path, error = %e, "could not load configuration");
            std::process::exit(1);
        }
    };
    info!(%config_path, "configuration loaded");

    let bridge = match Bridge::start(config).await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "bridge startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "signal listener failed");
    }
    info!("shutdown requested");

    if let Err(e) = bridge.shutdown().await {
        error!(error = %e, "shutdown error");
        std::process::exit(1);
    }
}
