// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # distance-sensor-ble
//!
//! A Bluetooth Low Energy central that finds one peripheral advertising the
//! distance sensor service, subscribes to its reading characteristic and
//! keeps a running minimum/maximum of the ASCII readings it streams.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Subscribing -> Streaming
//!           ^             |             |             |
//!           +-------------+-------------+-------------+
//!             connect/discovery failure or disconnect
//! ```
//!
//! The first scan pass is bounded (10 s); every pass after it runs until
//! the target is found. Failures never end the process; they are logged
//! and the controller scans again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use distance_sensor_ble::{BtleplugRadio, ClientConfig, ConnectionController, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (radio, events) = BtleplugRadio::new().await?;
//!     let mut controller = ConnectionController::new(radio, ClientConfig::default());
//!
//!     let stats = controller.statistics_reader();
//!     controller
//!         .run(events, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     let snapshot = stats.snapshot();
//!     println!("{} readings, min {} max {}", snapshot.count, snapshot.minimum, snapshot.maximum);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! The btleplug backend needs BlueZ on Linux (the user may need to be in
//! the `bluetooth` group), Bluetooth permission on macOS and Windows 10 or
//! later with Bluetooth LE support. Other radios plug in by implementing
//! [`Radio`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for config and snapshot types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod payload;
pub mod sink;
pub mod stats;

// Re-exports for convenience
pub use ble::{BtleplugRadio, PeripheralAddress, Radio, RadioEvent};
pub use config::{ClientConfig, ScanParams, StatisticsSeed};
pub use controller::{ConnectionController, ConnectionState, StateChange};
pub use error::{Error, Result};
pub use payload::{decode, decode_reading, PayloadAnomaly, MAX_PAYLOAD_LEN};
pub use sink::{NotificationReport, NotificationSink};
pub use stats::{SampleStatistics, StatisticsReader, StatsSnapshot};
