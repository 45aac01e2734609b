//! Domain types and policies for BLE device discovery.

pub mod gatt;
pub mod models;
pub mod report;
pub mod seen;
pub mod settings;
