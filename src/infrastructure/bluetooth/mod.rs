//! Bluetooth Module
//!
//! Discovers nearby BLE peripherals and walks the GATT profile of each new
//! one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DiscoveryService                      │
//! │   (dedup by address, bounded fan-out, report emission)   │
//! └──────────┬─────────────────────────────┬────────────────┘
//!            │ ScanEvent stream             │ per new device
//!            ▼                              ▼
//! ┌───────────────────┐          ┌─────────────────────┐
//! │   ScanSession     │          │   GattEnumerator    │
//! │ - start / stop    │          │ - services, then    │
//! │ - stopped once    │          │   characteristics   │
//! └─────────┬─────────┘          └──────────┬──────────┘
//!           └──────────────┬────────────────┘
//!                          ▼
//!                ┌───────────────────┐
//!                │    RadioStack     │
//!                │ WinRT / simulated │
//!                └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Radio stack trait and errors
//! - [`protocol`] - UUID serde and GUID adapters
//! - [`scanner`] - Scan session lifecycle
//! - [`enumeration`] - Per-device GATT walk
//! - [`service`] - Discovery coordinator
//! - [`simulated`] - In-memory radio driven by a scenario
//! - `winrt` - Windows radio (Windows only)

pub mod enumeration;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod service;
pub mod simulated;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::DiscoveryService;
