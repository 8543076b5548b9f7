//! Notification handling.
//!
//! The sink is the callback target of a subscribed characteristic. It is
//! attached to one connection at a time and drops anything that does not
//! come from that connection, so a notification that races a disconnect
//! can never touch the next session.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ble::radio::ConnectionHandle;
use crate::config::StatisticsSeed;
use crate::payload::decode_reading;
use crate::stats::{SampleStatistics, StatisticsReader, StatsSnapshot};

/// What one processed notification produced.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationReport {
    /// The decoded reading.
    pub value: f64,
    /// Statistics after folding the reading in.
    pub stats: StatsSnapshot,
    /// Notifications processed in the current session, including this one.
    pub session_count: u32,
    /// True only for the notification that reached the milestone.
    pub milestone: bool,
}

/// Receives notifications, updates statistics and logs status lines.
pub struct NotificationSink {
    /// Shared so readers on other tasks can take snapshots.
    stats: Arc<RwLock<SampleStatistics>>,
    /// Notifications per session before the milestone fires.
    milestone_threshold: u32,
    /// Connection this sink currently accepts notifications from.
    attached: Option<ConnectionHandle>,
    /// Notifications processed since `attach`.
    session_count: u32,
    /// Whether the milestone already fired this session.
    milestone_reached: bool,
}

impl NotificationSink {
    /// Create a detached sink.
    pub fn new(seed: StatisticsSeed, milestone_threshold: u32) -> Self {
        Self {
            stats: Arc::new(RwLock::new(SampleStatistics::with_seed(seed))),
            milestone_threshold: milestone_threshold.max(1),
            attached: None,
            session_count: 0,
            milestone_reached: false,
        }
    }

    /// Start accepting notifications from `connection`.
    ///
    /// Resets the per-session counter and milestone latch. Statistics carry over.
    pub fn attach(&mut self, connection: ConnectionHandle) {
        debug!("Notification sink attached to connection {}", connection);
        self.attached = Some(connection);
        self.session_count = 0;
        self.milestone_reached = false;
    }

    /// Stop accepting notifications.
    pub fn detach(&mut self) {
        if let Some(connection) = self.attached.take() {
            debug!("Notification sink detached from connection {}", connection);
        }
    }

    /// The connection currently attached, if any.
    pub fn attached(&self) -> Option<ConnectionHandle> {
        self.attached
    }

    /// Process one notification.
    ///
    /// Returns `None` when `source` is not the attached connection.
    pub fn on_notification(
        &mut self,
        source: ConnectionHandle,
        data: &[u8],
    ) -> Option<NotificationReport> {
        if self.attached != Some(source) {
            debug!(
                "Dropping notification from stale connection {} ({} bytes)",
                source,
                data.len()
            );
            return None;
        }

        let decoded = decode_reading(data);
        for anomaly in &decoded.anomalies {
            warn!("Payload anomaly: {}", anomaly);
        }

        let stats = {
            let mut stats = self.stats.write();
            stats.observe(decoded.value);
            stats.snapshot()
        };
        self.session_count += 1;

        info!(
            "[DATA {}] Received distance: {:.2} cm | Max: {:.2} cm | Min: {:.2} cm",
            stats.count, decoded.value, stats.maximum, stats.minimum
        );

        let milestone =
            !self.milestone_reached && self.session_count >= self.milestone_threshold;
        if milestone {
            self.milestone_reached = true;
            info!(
                "Received at least {} readings! Sufficient samples collected.",
                self.milestone_threshold
            );
        }

        Some(NotificationReport {
            value: decoded.value,
            stats,
            session_count: self.session_count,
            milestone,
        })
    }

    /// Current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.read().snapshot()
    }

    /// A read-only handle to the statistics for other tasks.
    pub fn reader(&self) -> StatisticsReader {
        StatisticsReader::new(self.stats.clone())
    }

    /// Whether the milestone fired in the current session.
    pub fn milestone_reached(&self) -> bool {
        self.milestone_reached
    }
}
