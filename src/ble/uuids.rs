//! BLE Service and Characteristic UUIDs.
//!
//! The distance sensor exposes a single custom service with one
//! notify characteristic carrying ASCII readings.

use uuid::Uuid;

/// Distance sensor service UUID (advertised by the peripheral).
pub const DISTANCE_SERVICE_UUID: Uuid = Uuid::from_u128(0x48848b39_e4c9_4cfc_8569_ea3d56eec20b);

/// Distance reading characteristic UUID (Notify).
pub const DISTANCE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xdd0a5dda_47bd_428f_ab5d_ed8cc9a69d03);

/// Check if an advertised service list names the distance service.
pub fn advertises_distance_service(services: &[Uuid]) -> bool {
    services.contains(&DISTANCE_SERVICE_UUID)
}
