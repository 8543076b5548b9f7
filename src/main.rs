//! Distance monitor: scan for the sensor, stream readings, log min/max.
//!
//! Run with: cargo run --bin distance-monitor

use distance_sensor_ble::{BtleplugRadio, ClientConfig, ConnectionController, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .init();

    info!("Starting BLE scan...");

    let (radio, events) = BtleplugRadio::new().await?;
    let mut controller = ConnectionController::new(radio, ClientConfig::default());
    let stats = controller.statistics_reader();

    controller
        .run(events, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let snapshot = stats.snapshot();
    info!(
        "Collected {} readings (min {:.2} cm, max {:.2} cm)",
        snapshot.count, snapshot.minimum, snapshot.maximum
    );

    Ok(())
}
