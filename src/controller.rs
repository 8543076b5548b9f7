//! Connection lifecycle state machine.
//!
//! The [`ConnectionController`] drives scan → connect → subscribe → stream
//! and back to scanning after any failure or disconnect. It is the single
//! owner of the scanner, the live [`GattSession`] and the notification
//! sink; radio callbacks reach it only as [`RadioEvent`]s consumed in
//! arrival order by [`ConnectionController::run`].

use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::ble::radio::{
    Advertisement, CharacteristicHandle, ConnectionHandle, PeripheralAddress, Radio, RadioEvent,
};
use crate::ble::scanner::DiscoveryScanner;
use crate::ble::session::GattSession;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::sink::NotificationSink;
use crate::stats::{StatisticsReader, StatsSnapshot};

/// Where the controller is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not scanning and not connected.
    #[default]
    Idle,
    /// Waiting for the target to advertise.
    Scanning,
    /// Establishing the link.
    Connecting,
    /// Discovering the service/characteristic and enabling notifications.
    Subscribing,
    /// Notifications are flowing.
    Streaming,
    /// Tearing a session down.
    Disconnecting,
}

impl ConnectionState {
    /// Check if a session is live.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Check if a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Subscribing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the change.
    pub from: ConnectionState,
    /// State after the change.
    pub to: ConnectionState,
}

/// Top-level orchestrator of the connection lifecycle.
pub struct ConnectionController<R: Radio> {
    /// Radio commands go here.
    radio: R,
    /// Configuration.
    config: ClientConfig,
    /// Current state, readable from other tasks.
    state: Arc<RwLock<ConnectionState>>,
    /// Channel for state change events.
    event_tx: broadcast::Sender<StateChange>,
    /// Scan lifecycle.
    scanner: DiscoveryScanner,
    /// The live session. Present only while `Streaming`.
    session: Option<GattSession>,
    /// Notification target.
    sink: NotificationSink,
    /// Whether `start` was called and `shutdown` was not.
    running: bool,
}

impl<R: Radio> ConnectionController<R> {
    /// Create an idle controller.
    pub fn new(radio: R, config: ClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        let scanner = DiscoveryScanner::new(config.service_uuid, config.scan);
        let sink = NotificationSink::new(config.statistics_seed, config.milestone_threshold);

        Self {
            radio,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            event_tx,
            scanner,
            session: None,
            sink,
            running: false,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscribe to state change events.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.event_tx.subscribe()
    }

    /// Current statistics.
    pub fn statistics(&self) -> StatsSnapshot {
        self.sink.snapshot()
    }

    /// A read-only statistics handle for other tasks.
    pub fn statistics_reader(&self) -> StatisticsReader {
        self.sink.reader()
    }

    /// Whether the milestone fired in the current session.
    pub fn milestone_reached(&self) -> bool {
        self.sink.milestone_reached()
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&GattSession> {
        self.session.as_ref()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the underlying radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Leave `Idle` and begin the first scan pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot start scanning.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Idle {
            debug!("Controller already started ({})", self.state());
            return Ok(());
        }

        self.running = true;
        self.begin_scan().await
    }

    /// Feed one radio event into the state machine.
    ///
    /// # Errors
    ///
    /// Only radio failures while restarting a scan are returned; every
    /// connection failure is logged and recovered here.
    pub async fn handle_event(&mut self, event: RadioEvent) -> Result<()> {
        match event {
            RadioEvent::Advertisement(advertisement) => {
                self.on_advertisement(advertisement).await
            }
            RadioEvent::ScanComplete => self.on_scan_complete().await,
            RadioEvent::Notification {
                characteristic,
                data,
            } => {
                self.on_notification(characteristic, &data);
                Ok(())
            }
            RadioEvent::Disconnected { connection } => self.on_disconnect(connection).await,
        }
    }

    /// Periodic heartbeat from the run loop.
    ///
    /// While streaming this only logs; notifications arrive as events. If a
    /// rescan failed earlier and left the controller idle, it is retried here.
    pub async fn tick(&mut self) -> Result<()> {
        match self.state() {
            ConnectionState::Streaming => {
                info!("Connected, waiting for notifications...");
                Ok(())
            }
            ConnectionState::Idle if self.running => {
                info!("Retrying scan");
                self.begin_scan().await
            }
            _ => Ok(()),
        }
    }

    /// Drive the state machine until `shutdown` resolves.
    ///
    /// Events are handled strictly in the order the radio produced them. A
    /// connect attempt runs to completion, or to `connect_timeout`, before
    /// the next event is taken; events arriving meanwhile wait in the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioClosed`] if the event stream ends, or any
    /// unrecoverable radio error.
    pub async fn run<S, F>(&mut self, mut events: S, shutdown: F) -> Result<()>
    where
        S: Stream<Item = RadioEvent> + Unpin,
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            if !e.is_recoverable() {
                return Err(e);
            }
            error!("Failed to start scanning: {}", e);
        }

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            let step = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        error!("Radio event stream closed");
                        break Err(Error::RadioClosed);
                    }
                },
                _ = ticker.tick() => self.tick().await,
            };

            if let Err(e) = step {
                if !e.is_recoverable() {
                    break Err(e);
                }
                error!("Radio error: {}", e);
            }
        };

        self.shutdown().await;
        result
    }

    /// Stop scanning, drop any live session and return to `Idle`.
    pub async fn shutdown(&mut self) {
        info!("Shutting down connection controller");
        self.running = false;

        if let Err(e) = self.scanner.stop(&self.radio).await {
            warn!("Error stopping scan: {}", e);
        }

        if let Some(session) = self.session.take() {
            self.set_state(ConnectionState::Disconnecting);
            self.sink.detach();
            session.teardown(&self.radio).await;
        }

        self.set_state(ConnectionState::Idle);
    }

    async fn begin_scan(&mut self) -> Result<()> {
        match self.scanner.start(&self.radio).await {
            Ok(()) => {
                self.set_state(ConnectionState::Scanning);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                Err(e)
            }
        }
    }

    async fn on_advertisement(&mut self, advertisement: Advertisement) -> Result<()> {
        if self.state() != ConnectionState::Scanning {
            trace!(
                "Advertisement from {} while {}, ignoring",
                advertisement.address,
                self.state()
            );
            return Ok(());
        }

        match self
            .scanner
            .on_advertisement(&self.radio, &advertisement)
            .await
        {
            Some(address) => self.connect_to(address).await,
            None => Ok(()),
        }
    }

    async fn on_scan_complete(&mut self) -> Result<()> {
        if self.scanner.on_scan_complete() && self.state() == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
            return self.begin_scan().await;
        }
        Ok(())
    }

    async fn connect_to(&mut self, address: PeripheralAddress) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        info!("Attempting to connect...");

        let mut session = match GattSession::connect(
            &self.radio,
            address,
            self.config.mtu,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => return self.recover(None, e).await,
        };

        self.set_state(ConnectionState::Subscribing);

        let characteristic = match session
            .subscribe(
                &self.radio,
                self.config.service_uuid,
                self.config.characteristic_uuid,
            )
            .await
        {
            Ok(characteristic) => characteristic,
            Err(e) => return self.recover(Some(session), e).await,
        };

        self.sink.attach(characteristic.connection);
        self.session = Some(session);
        info!("Successfully connected!");
        self.set_state(ConnectionState::Streaming);

        Ok(())
    }

    /// Unwind a failed connect attempt and go back to scanning.
    async fn recover(&mut self, session: Option<GattSession>, cause: Error) -> Result<()> {
        warn!("Failed to connect: {}", cause);

        if let Some(session) = session {
            self.set_state(ConnectionState::Disconnecting);
            session.teardown(&self.radio).await;
        }

        self.set_state(ConnectionState::Idle);
        self.begin_scan().await
    }

    fn on_notification(&mut self, characteristic: CharacteristicHandle, data: &[u8]) {
        let live = self.state().is_streaming()
            && self
                .session
                .as_ref()
                .map(|session| session.owns(&characteristic))
                .unwrap_or(false);

        if !live {
            trace!(
                "Dropping notification from {} while {}",
                characteristic.connection,
                self.state()
            );
            return;
        }

        self.sink.on_notification(characteristic.connection, data);
    }

    async fn on_disconnect(&mut self, connection: ConnectionHandle) -> Result<()> {
        let owned = self
            .session
            .as_ref()
            .map(|session| session.is_link(connection))
            .unwrap_or(false);

        if !owned {
            debug!("Ignoring disconnect of stale connection {}", connection);
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        // Handles go first so nothing can reach the dead link.
        self.sink.detach();
        if let Some(mut session) = self.session.take() {
            session.invalidate();
            warn!(
                "{}",
                Error::UnexpectedDisconnect {
                    address: session.address().to_string(),
                }
            );
        }
        info!("Disconnected from BLE server");

        self.begin_scan().await
    }

    /// Update the state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(StateChange {
                from: old_state,
                to: new_state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::testing::StalledRadio;
    use crate::ble::radio::{event_channel, MockRadio, ServiceHandle, SubscribeOutcome};
    use crate::ble::uuids::{DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID};
    use crate::config::ScanParams;
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    const TARGET: &str = "AA:BB:CC:DD:EE:FF";

    fn target_advertisement() -> RadioEvent {
        RadioEvent::Advertisement(Advertisement {
            address: PeripheralAddress::new(TARGET),
            local_name: Some("ESP32".to_string()),
            rssi: Some(-55),
            services: vec![DISTANCE_SERVICE_UUID],
        })
    }

    fn other_advertisement() -> RadioEvent {
        RadioEvent::Advertisement(Advertisement {
            address: PeripheralAddress::new("11:22:33:44:55:66"),
            local_name: None,
            rssi: Some(-80),
            services: vec![Uuid::from_u128(0x180d)],
        })
    }

    fn characteristic(connection: ConnectionHandle) -> CharacteristicHandle {
        CharacteristicHandle {
            connection,
            service: DISTANCE_SERVICE_UUID,
            uuid: DISTANCE_CHARACTERISTIC_UUID,
        }
    }

    fn notification(connection: ConnectionHandle, payload: &[u8]) -> RadioEvent {
        RadioEvent::Notification {
            characteristic: characteristic(connection),
            data: payload.to_vec(),
        }
    }

    /// A radio that records scan passes and hands out fresh connection
    /// handles starting at 1. Discovery always succeeds.
    fn recording_radio(scans: Arc<Mutex<Vec<ScanParams>>>) -> MockRadio {
        let mut radio = MockRadio::new();
        radio.expect_start_scan().returning(move |params| {
            scans.lock().push(params);
            Ok(())
        });
        radio.expect_stop_scan().returning(|| Ok(()));

        let next = AtomicU64::new(1);
        radio
            .expect_connect()
            .with(eq(PeripheralAddress::new(TARGET)))
            .returning(move |_| Ok(ConnectionHandle(next.fetch_add(1, Ordering::SeqCst))));
        radio.expect_request_mtu().returning(|_, mtu| Ok(mtu));
        radio
    }

    fn with_discovery(mut radio: MockRadio) -> MockRadio {
        radio
            .expect_discover_service()
            .returning(|connection, uuid| Ok(Some(ServiceHandle { connection, uuid })));
        radio
            .expect_discover_characteristic()
            .returning(|service, uuid| {
                Ok(Some(CharacteristicHandle {
                    connection: service.connection,
                    service: service.uuid,
                    uuid,
                }))
            });
        radio
            .expect_subscribe()
            .returning(|_| Ok(SubscribeOutcome::Subscribed));
        radio
    }

    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(change) = rx.try_recv() {
            states.push(change.to);
        }
        states
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Streaming.is_streaming());
        assert!(!ConnectionState::Scanning.is_streaming());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Subscribing.is_connecting());
        assert!(!ConnectionState::Streaming.is_connecting());
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Streaming), "Streaming");
        assert_eq!(format!("{}", ConnectionState::Disconnecting), "Disconnecting");
    }

    #[tokio::test]
    async fn test_start_begins_bounded_scan() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = recording_radio(scans.clone());
        let mut controller = ConnectionController::new(radio, ClientConfig::default());

        controller.start().await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Scanning);

        // Starting twice is a no-op.
        controller.start().await.unwrap();
        assert_eq!(scans.lock().clone(), vec![ScanParams::default()]);
    }

    #[tokio::test]
    async fn test_unrelated_advertisement_ignored() {
        let mut radio = MockRadio::new();
        radio.expect_start_scan().times(1).returning(|_| Ok(()));
        radio.expect_stop_scan().never();
        radio.expect_connect().never();

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        controller.start().await.unwrap();
        let mut states = controller.subscribe_state();

        controller.handle_event(other_advertisement()).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(drain(&mut states).is_empty());
    }

    #[tokio::test]
    async fn test_match_reaches_streaming() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = with_discovery(recording_radio(scans));
        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let mut states = controller.subscribe_state();

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Streaming);
        assert_eq!(
            drain(&mut states),
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Subscribing,
                ConnectionState::Streaming,
            ]
        );
        let session = controller.session().unwrap();
        assert_eq!(session.connection(), Some(ConnectionHandle(1)));
        assert_eq!(
            session.characteristic(),
            Some(characteristic(ConnectionHandle(1)))
        );
    }

    #[tokio::test]
    async fn test_notifications_update_statistics() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = with_discovery(recording_radio(scans));
        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let link = ConnectionHandle(1);

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        let expected = [(12.5, 12.5, 1), (8.0, 12.5, 2), (8.0, 20.3, 3)];
        for (payload, (min, max, count)) in [&b"12.5"[..], b"8.0", b"20.3"].iter().zip(expected) {
            controller
                .handle_event(notification(link, payload))
                .await
                .unwrap();
            assert_eq!(
                controller.statistics(),
                StatsSnapshot {
                    minimum: min,
                    maximum: max,
                    count
                }
            );
        }
    }

    #[tokio::test]
    async fn test_milestone_once_after_ten() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = with_discovery(recording_radio(scans));
        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let link = ConnectionHandle(1);

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        for _ in 0..9 {
            controller
                .handle_event(notification(link, b"10.0"))
                .await
                .unwrap();
        }
        assert!(!controller.milestone_reached());

        controller
            .handle_event(notification(link, b"10.0"))
            .await
            .unwrap();
        assert!(controller.milestone_reached());

        controller
            .handle_event(notification(link, b"11.0"))
            .await
            .unwrap();
        assert!(controller.milestone_reached());
        assert_eq!(controller.statistics().count, 11);
        assert_eq!(controller.statistics().maximum, 11.0);
    }

    #[tokio::test]
    async fn test_characteristic_missing_resumes_scanning() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let mut radio = recording_radio(scans.clone());
        radio
            .expect_discover_service()
            .returning(|connection, uuid| Ok(Some(ServiceHandle { connection, uuid })));
        radio
            .expect_discover_characteristic()
            .returning(|_, _| Ok(None));
        radio.expect_subscribe().never();
        radio
            .expect_disconnect()
            .with(eq(ConnectionHandle(1)))
            .times(1)
            .returning(|_| Ok(()));

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let mut states = controller.subscribe_state();

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.session().is_none());
        let history = drain(&mut states);
        assert!(!history.contains(&ConnectionState::Streaming));
        assert_eq!(
            history,
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Subscribing,
                ConnectionState::Disconnecting,
                ConnectionState::Idle,
                ConnectionState::Scanning,
            ]
        );
        assert_eq!(
            scans.lock().clone(),
            vec![ScanParams::default(), ScanParams::default().unbounded()]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_resumes_scanning() {
        let mut radio = MockRadio::new();
        radio.expect_start_scan().returning(|_| Ok(()));
        radio.expect_stop_scan().returning(|| Ok(()));
        radio.expect_connect().returning(|address| {
            Err(Error::ConnectFailed {
                address: address.to_string(),
                reason: "timed out".to_string(),
            })
        });
        radio.expect_disconnect().never();
        radio.expect_discover_service().never();

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.session().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_rescans_and_drops_old_session() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let mut radio = recording_radio(scans.clone());
        radio
            .expect_discover_service()
            .times(1)
            .returning(|connection, uuid| Ok(Some(ServiceHandle { connection, uuid })));
        radio
            .expect_discover_characteristic()
            .times(1)
            .returning(|service, uuid| {
                Ok(Some(CharacteristicHandle {
                    connection: service.connection,
                    service: service.uuid,
                    uuid,
                }))
            });
        radio
            .expect_subscribe()
            .times(1)
            .returning(|_| Ok(SubscribeOutcome::Subscribed));
        // The link is already gone: nothing may be sent over the old handle.
        radio.expect_disconnect().never();

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let old = ConnectionHandle(1);

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();
        controller
            .handle_event(notification(old, b"4.0"))
            .await
            .unwrap();

        controller
            .handle_event(RadioEvent::Disconnected { connection: old })
            .await
            .unwrap();

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.session().is_none());
        assert_eq!(
            scans.lock().last().copied(),
            Some(ScanParams::default().unbounded())
        );

        // Late traffic for the dead session is ignored.
        controller
            .handle_event(notification(old, b"99.0"))
            .await
            .unwrap();
        controller
            .handle_event(RadioEvent::Disconnected { connection: old })
            .await
            .unwrap();
        assert_eq!(controller.statistics().count, 1);
        assert_eq!(controller.statistics().maximum, 4.0);
        assert_eq!(controller.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_reconnect_uses_new_handle() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = with_discovery(recording_radio(scans));
        let mut controller = ConnectionController::new(radio, ClientConfig::default());

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();
        controller
            .handle_event(RadioEvent::Disconnected {
                connection: ConnectionHandle(1),
            })
            .await
            .unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Streaming);
        assert_eq!(
            controller.session().and_then(|s| s.connection()),
            Some(ConnectionHandle(2))
        );

        controller
            .handle_event(notification(ConnectionHandle(1), b"1.0"))
            .await
            .unwrap();
        controller
            .handle_event(notification(ConnectionHandle(2), b"2.0"))
            .await
            .unwrap();
        assert_eq!(controller.statistics().count, 1);
    }

    #[tokio::test]
    async fn test_bounded_pass_timeout_rescans_unbounded() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = recording_radio(scans.clone());
        let mut controller = ConnectionController::new(radio, ClientConfig::default());

        controller.start().await.unwrap();
        controller
            .handle_event(RadioEvent::ScanComplete)
            .await
            .unwrap();
        assert_eq!(controller.state(), ConnectionState::Scanning);

        // Unbounded passes ignore completions.
        controller
            .handle_event(RadioEvent::ScanComplete)
            .await
            .unwrap();

        assert_eq!(
            scans.lock().clone(),
            vec![ScanParams::default(), ScanParams::default().unbounded()]
        );
    }

    #[tokio::test]
    async fn test_tick_retries_failed_scan() {
        let mut radio = MockRadio::new();
        let attempts = AtomicU64::new(0);
        radio.expect_start_scan().returning(move |_| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Internal("adapter busy".to_string()))
            } else {
                Ok(())
            }
        });

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        assert!(controller.start().await.is_err());
        assert_eq!(controller.state(), ConnectionState::Idle);

        controller.tick().await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_run_processes_events_in_order() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let mut radio = with_discovery(recording_radio(scans));
        radio.expect_disconnect().returning(|_| Ok(()));

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let reader = controller.statistics_reader();
        let (tx, rx) = event_channel();
        let link = ConnectionHandle(1);

        tx.unbounded_send(other_advertisement()).unwrap();
        tx.unbounded_send(target_advertisement()).unwrap();
        for payload in [&b"12.5"[..], b"8.0", b"20.3"] {
            tx.unbounded_send(notification(link, payload)).unwrap();
        }
        drop(tx);

        let result = controller.run(rx, futures::future::pending()).await;

        assert!(matches!(result, Err(Error::RadioClosed)));
        assert_eq!(
            reader.snapshot(),
            StatsSnapshot {
                minimum: 8.0,
                maximum: 20.3,
                count: 3
            }
        );
        assert_eq!(controller.state(), ConnectionState::Idle);
        assert!(controller.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out_and_rescans() {
        let radio = StalledRadio::default();
        let scans = radio.scans.clone();
        let config = ClientConfig::default().with_connect_timeout(Duration::from_secs(5));
        let mut controller = ConnectionController::new(radio, config);
        let mut states = controller.subscribe_state();
        let (tx, rx) = event_channel();

        tx.unbounded_send(target_advertisement()).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            controller.run(rx, tokio::time::sleep(Duration::from_secs(20))),
        )
        .await
        .expect("run must return once shutdown resolves");

        assert!(result.is_ok());
        let scans = scans.lock();
        assert_eq!(scans.len(), 2);
        assert!(scans[0].is_bounded());
        assert!(!scans[1].is_bounded());
        assert_eq!(
            drain(&mut states),
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Idle,
                ConnectionState::Scanning,
                ConnectionState::Idle,
            ]
        );
        drop(tx);
    }

    #[tokio::test]
    async fn test_streaming_heartbeat_logged_at_info() {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let radio = with_discovery(recording_radio(scans));
        let mut controller = ConnectionController::new(radio, ClientConfig::default());

        controller.start().await.unwrap();
        controller.handle_event(target_advertisement()).await.unwrap();

        let output = Arc::new(Mutex::new(Vec::new()));
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || CapturedLog(writer.clone()))
            .finish();

        {
            let _guard = tracing::subscriber::set_default(subscriber);
            controller.tick().await.unwrap();
        }

        let logged = String::from_utf8(output.lock().clone()).unwrap();
        assert!(logged.contains("Connected, waiting for notifications..."));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut radio = MockRadio::new();
        radio.expect_start_scan().times(1).returning(|_| Ok(()));
        radio.expect_stop_scan().times(1).returning(|| Ok(()));

        let mut controller = ConnectionController::new(radio, ClientConfig::default());
        let (_tx, rx) = event_channel();

        controller.run(rx, async {}).await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Idle);
    }
}
