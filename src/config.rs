//! Client configuration.
//!
//! Every tunable lives here so it can be changed in one place. There is
//! no file, environment or command-line layer: the process runs with
//! [`ClientConfig::default`] unless an embedding application builds its own.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID};

/// Scan interval in 0.625 ms radio units.
pub const DEFAULT_SCAN_INTERVAL: u16 = 1349;

/// Scan window in 0.625 ms radio units.
pub const DEFAULT_SCAN_WINDOW: u16 = 449;

/// Duration of the first, bounded scan pass.
pub const FIRST_SCAN_PASS: Duration = Duration::from_secs(10);

/// Notifications per session before the milestone message is logged.
pub const DEFAULT_MILESTONE_THRESHOLD: u32 = 10;

/// MTU requested after the link comes up.
pub const DEFAULT_MTU: u16 = 517;

/// How long a link attempt may take before it counts as failed.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for one scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanParams {
    /// Scan interval (0.625 ms units).
    pub interval: u16,
    /// Scan window (0.625 ms units). Never larger than `interval`.
    pub window: u16,
    /// Request scan responses from advertisers.
    pub active: bool,
    /// How long the pass runs. `None` scans until stopped.
    pub duration: Option<Duration>,
}

impl ScanParams {
    /// The same parameters with no time limit.
    pub fn unbounded(self) -> Self {
        Self {
            duration: None,
            ..self
        }
    }

    /// Whether this pass ends by itself.
    pub fn is_bounded(&self) -> bool {
        self.duration.is_some()
    }
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCAN_INTERVAL,
            window: DEFAULT_SCAN_WINDOW,
            active: true,
            duration: Some(FIRST_SCAN_PASS),
        }
    }
}

/// Initial values for the running minimum and maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatisticsSeed {
    /// Minimum starts at +inf, maximum at -inf.
    #[default]
    Unbounded,
    /// Maximum starts at 0 and minimum at 9999, as the sensor firmware did.
    ///
    /// Negative readings never become the maximum and readings above 9999
    /// never become the minimum until a smaller one arrives.
    Legacy,
}

/// Configuration for the connection controller and its components.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Service the peripheral must advertise and expose.
    pub service_uuid: Uuid,
    /// Characteristic to subscribe to inside that service.
    pub characteristic_uuid: Uuid,
    /// Parameters for the first scan pass. Later passes drop the duration.
    pub scan: ScanParams,
    /// MTU to request after connecting.
    pub mtu: u16,
    /// Upper bound on one link attempt.
    pub connect_timeout: Duration,
    /// Notifications per session before the milestone fires.
    pub milestone_threshold: u32,
    /// Heartbeat period of the run loop.
    pub tick_interval: Duration,
    /// How min/max are seeded.
    pub statistics_seed: StatisticsSeed,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_uuid: DISTANCE_SERVICE_UUID,
            characteristic_uuid: DISTANCE_CHARACTERISTIC_UUID,
            scan: ScanParams::default(),
            mtu: DEFAULT_MTU,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            milestone_threshold: DEFAULT_MILESTONE_THRESHOLD,
            tick_interval: Duration::from_secs(1),
            statistics_seed: StatisticsSeed::default(),
        }
    }
}

impl ClientConfig {
    /// Target a different service/characteristic pair.
    pub fn with_target(mut self, service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        self.service_uuid = service_uuid;
        self.characteristic_uuid = characteristic_uuid;
        self
    }

    /// Replace the first-pass scan parameters.
    pub fn with_scan(mut self, scan: ScanParams) -> Self {
        self.scan = scan;
        self
    }

    /// Set the milestone threshold. Zero is clamped to one.
    pub fn with_milestone_threshold(mut self, threshold: u32) -> Self {
        self.milestone_threshold = threshold.max(1);
        self
    }

    /// Set how long a link attempt may take.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the heartbeat period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Choose how statistics are seeded.
    pub fn with_statistics_seed(mut self, seed: StatisticsSeed) -> Self {
        self.statistics_seed = seed;
        self
    }
}
