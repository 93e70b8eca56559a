//! This file defines the ons-energy-viz binary entry point.

use ons_energy_viz::app;
use ons_energy_viz::cli;
use ons_energy_viz::metrics;
use ons_energy_viz::server;
use ons_energy_viz::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    app::init(&args);
    let service = app::service(&args);
    if let Err(err) = server::serve(&args, service).await {
        ::tracing::error!("server failed: {}", err);
    }
    tracing::shutdown_tracing();
}
