//! BLE communication module.
//!
//! This module holds the radio boundary and the components that sit
//! directly on it: discovery, the GATT session and the btleplug backend.

pub mod discovered;
pub mod platform;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod uuids;

pub use discovered::DiscoveredPeripherals;
pub use platform::BtleplugRadio;
pub use radio::{
    Advertisement, CharacteristicHandle, ConnectionHandle, PeripheralAddress, Radio, RadioEvent,
    RadioEvents, ServiceHandle, SubscribeOutcome,
};
pub use scanner::DiscoveryScanner;
pub use session::GattSession;
pub use uuids::*;
