//! BLE device discovery: scan for advertisements, deduplicate by address and
//! report the GATT profile of every new device.

pub mod domain;
pub mod infrastructure;
