//! GATT session management.
//!
//! A [`GattSession`] owns the handles of one connection attempt: the link
//! itself and, once subscribed, the notify characteristic. Handles only
//! leave the session by value and are cleared together, so nothing can
//! use them after the session has been torn down or invalidated.

use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::radio::{
    CharacteristicHandle, ConnectionHandle, PeripheralAddress, Radio, SubscribeOutcome,
};
use crate::error::{Error, Result};

/// One connection to the target peripheral.
#[derive(Debug)]
pub struct GattSession {
    /// The peripheral this session talks to.
    address: PeripheralAddress,
    /// The link. `None` once the session is torn down or invalidated.
    connection: Option<ConnectionHandle>,
    /// The subscribed characteristic. Only present while `connection` is.
    characteristic: Option<CharacteristicHandle>,
}

impl GattSession {
    /// Establish a link to `address` within `timeout` and request `mtu`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the link cannot be established
    /// or the attempt takes longer than `timeout`.
    pub async fn connect<R: Radio + ?Sized>(
        radio: &R,
        address: PeripheralAddress,
        mtu: u16,
        timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting to: {}", address);

        let attempt = tokio::time::timeout(timeout, radio.connect(address.clone())).await;
        let connection = match attempt {
            Ok(Ok(connection)) => connection,
            Ok(Err(e @ Error::ConnectFailed { .. })) => return Err(e),
            Ok(Err(e)) => {
                return Err(Error::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_elapsed) => {
                return Err(Error::ConnectFailed {
                    address: address.to_string(),
                    reason: "timed out".to_string(),
                })
            }
        };

        info!("Connected to device {} (connection {})", address, connection);

        match radio.request_mtu(connection, mtu).await {
            Ok(effective) => debug!("MTU in effect: {}", effective),
            Err(Error::NotSupported { operation }) => debug!("Skipping {}", operation),
            Err(e) => warn!("MTU request failed, continuing with default: {}", e),
        }

        Ok(Self {
            address,
            connection: Some(connection),
            characteristic: None,
        })
    }

    /// Discover `service` and `characteristic` and enable notifications.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`], [`Error::CharacteristicNotFound`]
    /// or [`Error::NotifyUnsupported`] for the matching discovery failure.
    /// The session keeps its link either way; the caller tears it down.
    pub async fn subscribe<R: Radio + ?Sized>(
        &mut self,
        radio: &R,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle> {
        let connection = self.connection.ok_or(Error::NotConnected { connection: 0 })?;

        let service_handle = radio
            .discover_service(connection, service)
            .await?
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?;
        info!("Service found!");

        let handle = radio
            .discover_characteristic(service_handle, characteristic)
            .await?
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;
        info!("Characteristic found!");

        info!("Subscribing to notifications...");
        match radio.subscribe(handle).await? {
            SubscribeOutcome::Subscribed => {}
            SubscribeOutcome::NotifyUnsupported => {
                return Err(Error::NotifyUnsupported {
                    uuid: characteristic.to_string(),
                })
            }
        }

        self.characteristic = Some(handle);
        Ok(handle)
    }

    /// The peripheral this session belongs to.
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    /// The link, while the session holds one.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    /// The subscribed characteristic, while the session holds one.
    pub fn characteristic(&self) -> Option<CharacteristicHandle> {
        self.characteristic
    }

    /// Whether a notification from `characteristic` belongs to this session.
    pub fn owns(&self, characteristic: &CharacteristicHandle) -> bool {
        self.connection.is_some() && self.characteristic.as_ref() == Some(characteristic)
    }

    /// Whether a disconnect of `connection` ends this session.
    pub fn is_link(&self, connection: ConnectionHandle) -> bool {
        self.connection == Some(connection)
    }

    /// Drop both handles after the radio reported the link down.
    pub fn invalidate(&mut self) {
        self.characteristic = None;
        self.connection = None;
    }

    /// Disconnect the link (if any) and consume the session.
    ///
    /// Disconnect failures are logged; the handles are gone either way.
    pub async fn teardown<R: Radio + ?Sized>(mut self, radio: &R) {
        let connection = self.connection.take();
        self.characteristic = None;

        if let Some(connection) = connection {
            debug!("Tearing down connection {} to {}", connection, self.address);
            if let Err(e) = radio.disconnect(connection).await {
                warn!("Failed to disconnect {}: {}", self.address, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::testing::StalledRadio;
    use crate::ble::radio::{MockRadio, ServiceHandle};
    use crate::ble::uuids::{DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID};
    use mockall::predicate::eq;

    const LINK: ConnectionHandle = ConnectionHandle(3);
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn service_handle() -> ServiceHandle {
        ServiceHandle {
            connection: LINK,
            uuid: DISTANCE_SERVICE_UUID,
        }
    }

    fn characteristic_handle() -> CharacteristicHandle {
        CharacteristicHandle {
            connection: LINK,
            service: DISTANCE_SERVICE_UUID,
            uuid: DISTANCE_CHARACTERISTIC_UUID,
        }
    }

    fn connected_radio() -> MockRadio {
        let mut radio = MockRadio::new();
        radio.expect_connect().returning(|_| Ok(LINK));
        radio
            .expect_request_mtu()
            .with(eq(LINK), eq(517u16))
            .returning(|_, mtu| Ok(mtu));
        radio
    }

    async fn connect(radio: &MockRadio) -> GattSession {
        GattSession::connect(radio, PeripheralAddress::new("AA"), 517, TIMEOUT)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_subscribe() {
        let mut radio = connected_radio();
        radio
            .expect_discover_service()
            .with(eq(LINK), eq(DISTANCE_SERVICE_UUID))
            .returning(|_, _| Ok(Some(service_handle())));
        radio
            .expect_discover_characteristic()
            .returning(|_, _| Ok(Some(characteristic_handle())));
        radio
            .expect_subscribe()
            .with(eq(characteristic_handle()))
            .returning(|_| Ok(SubscribeOutcome::Subscribed));

        let mut session = connect(&radio).await;
        let handle = session
            .subscribe(&radio, DISTANCE_SERVICE_UUID, DISTANCE_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        assert_eq!(handle, characteristic_handle());
        assert!(session.owns(&handle));
        assert!(session.is_link(LINK));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_failed() {
        let mut radio = MockRadio::new();
        radio
            .expect_connect()
            .returning(|_| Err(Error::Internal("refused".to_string())));
        radio.expect_request_mtu().never();

        let err = GattSession::connect(&radio, PeripheralAddress::new("AA"), 517, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let radio = StalledRadio::default();

        let err = GattSession::connect(&radio, PeripheralAddress::new("AA"), 517, TIMEOUT)
            .await
            .unwrap_err();

        match err {
            Error::ConnectFailed { address, reason } => {
                assert_eq!(address, "AA");
                assert_eq!(reason, "timed out");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mtu_failure_not_fatal() {
        let mut radio = MockRadio::new();
        radio.expect_connect().returning(|_| Ok(LINK));
        radio
            .expect_request_mtu()
            .returning(|_, _| Err(Error::Internal("no mtu".to_string())));

        let session = connect(&radio).await;
        assert_eq!(session.connection(), Some(LINK));
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let mut radio = connected_radio();
        radio.expect_discover_service().returning(|_, _| Ok(None));
        radio.expect_discover_characteristic().never();

        let mut session = connect(&radio).await;
        let err = session
            .subscribe(&radio, DISTANCE_SERVICE_UUID, DISTANCE_CHARACTERISTIC_UUID)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert!(session.characteristic().is_none());
    }

    #[tokio::test]
    async fn test_characteristic_not_found() {
        let mut radio = connected_radio();
        radio
            .expect_discover_service()
            .returning(|_, _| Ok(Some(service_handle())));
        radio
            .expect_discover_characteristic()
            .returning(|_, _| Ok(None));
        radio.expect_subscribe().never();

        let mut session = connect(&radio).await;
        let err = session
            .subscribe(&radio, DISTANCE_SERVICE_UUID, DISTANCE_CHARACTERISTIC_UUID)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[tokio::test]
    async fn test_notify_unsupported() {
        let mut radio = connected_radio();
        radio
            .expect_discover_service()
            .returning(|_, _| Ok(Some(service_handle())));
        radio
            .expect_discover_characteristic()
            .returning(|_, _| Ok(Some(characteristic_handle())));
        radio
            .expect_subscribe()
            .returning(|_| Ok(SubscribeOutcome::NotifyUnsupported));

        let mut session = connect(&radio).await;
        let err = session
            .subscribe(&radio, DISTANCE_SERVICE_UUID, DISTANCE_CHARACTERISTIC_UUID)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotifyUnsupported { .. }));
        assert!(!session.owns(&characteristic_handle()));
    }

    #[tokio::test]
    async fn test_teardown_disconnects_once() {
        let mut radio = connected_radio();
        radio
            .expect_disconnect()
            .with(eq(LINK))
            .times(1)
            .returning(|_| Ok(()));

        let session = connect(&radio).await;
        session.teardown(&radio).await;
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_handles() {
        let mut radio = connected_radio();
        radio
            .expect_discover_service()
            .returning(|_, _| Ok(Some(service_handle())));
        radio
            .expect_discover_characteristic()
            .returning(|_, _| Ok(Some(characteristic_handle())));
        radio
            .expect_subscribe()
            .returning(|_| Ok(SubscribeOutcome::Subscribed));
        radio.expect_disconnect().never();

        let mut session = connect(&radio).await;
        let handle = session
            .subscribe(&radio, DISTANCE_SERVICE_UUID, DISTANCE_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        session.invalidate();
        assert!(session.connection().is_none());
        assert!(session.characteristic().is_none());
        assert!(!session.owns(&handle));

        // Link already down: teardown must not touch the radio.
        session.teardown(&radio).await;
    }
}
