//! BLE scanning functionality.
//!
//! [`DiscoveryScanner`] owns the scan lifecycle: it starts passes, filters
//! advertisements by service UUID and stops the radio on the first match.

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::radio::{Advertisement, PeripheralAddress, Radio};
use crate::config::ScanParams;
use crate::error::Result;

/// What the scanner is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// No pass running.
    #[default]
    Idle,
    /// A pass is running.
    Active {
        /// Whether the pass ends on its own.
        bounded: bool,
    },
}

/// Finds the single peripheral advertising the target service.
pub struct DiscoveryScanner {
    /// Service the peripheral must advertise.
    target: Uuid,
    /// Parameters of the first pass.
    params: ScanParams,
    /// Current scan state.
    state: ScanState,
    /// Number of passes started so far.
    passes: u32,
}

impl DiscoveryScanner {
    /// Create an idle scanner.
    pub fn new(target: Uuid, params: ScanParams) -> Self {
        Self {
            target,
            params,
            state: ScanState::Idle,
            passes: 0,
        }
    }

    /// Check if a pass is running.
    pub fn is_scanning(&self) -> bool {
        matches!(self.state, ScanState::Active { .. })
    }

    /// Current scan state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Number of passes started.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Parameters the next pass will use.
    ///
    /// Only the first pass is bounded; every later one runs until stopped.
    pub fn next_params(&self) -> ScanParams {
        if self.passes == 0 {
            self.params
        } else {
            self.params.unbounded()
        }
    }

    /// Start a scan pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot start scanning.
    pub async fn start<R: Radio + ?Sized>(&mut self, radio: &R) -> Result<()> {
        if self.is_scanning() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        let params = self.next_params();
        match params.duration {
            Some(duration) => info!(
                "Starting BLE scan for {} ({:?} pass)",
                self.target, duration
            ),
            None => info!("Scanning for BLE devices advertising {}...", self.target),
        }

        radio.start_scan(params).await?;

        self.passes += 1;
        self.state = ScanState::Active {
            bounded: params.is_bounded(),
        };

        Ok(())
    }

    /// Stop the current pass. Stopping an idle scanner is a no-op.
    pub async fn stop<R: Radio + ?Sized>(&mut self, radio: &R) -> Result<()> {
        if !self.is_scanning() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        // Mark idle first: whatever the radio still delivers is ignored.
        self.state = ScanState::Idle;
        info!("Stopping BLE scan");
        radio.stop_scan().await
    }

    /// Filter one advertisement.
    ///
    /// On the first match the scan is stopped and the address returned.
    /// Non-matching advertisements and anything received while idle
    /// return `None`.
    pub async fn on_advertisement<R: Radio + ?Sized>(
        &mut self,
        radio: &R,
        advertisement: &Advertisement,
    ) -> Option<PeripheralAddress> {
        if !self.is_scanning() {
            trace!(
                "Advertisement from {} after scan stopped, ignoring",
                advertisement.address
            );
            return None;
        }

        debug!(
            "Found device: {} (name: {:?}, rssi: {:?})",
            advertisement.address, advertisement.local_name, advertisement.rssi
        );

        if !advertisement.advertises(&self.target) {
            return None;
        }

        info!(
            "Found target BLE device {}! Stopping scan...",
            advertisement.address
        );

        if let Err(e) = self.stop(radio).await {
            warn!("Failed to stop scan after match: {}", e);
        }

        Some(advertisement.address.clone())
    }

    /// Handle the end of a bounded pass.
    ///
    /// Returns `true` if this ended the running pass. Unbounded passes
    /// never complete by themselves, so a late completion from an earlier
    /// pass is ignored.
    pub fn on_scan_complete(&mut self) -> bool {
        match self.state {
            ScanState::Active { bounded: true } => {
                info!("Scan pass ended without finding the target");
                self.state = ScanState::Idle;
                true
            }
            _ => {
                trace!("Ignoring stale scan completion");
                false
            }
        }
    }
}
