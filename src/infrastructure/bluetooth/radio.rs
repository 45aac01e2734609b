//! Radio stack boundary.
//!
//! Everything below this trait (the platform BLE driver, packet parsing,
//! GATT wire protocol, connection setup) is owned by the implementation.
//! Discovery only talks to the radio through [`RadioStack`].

use crate::domain::models::{
    AdvertisementEvent, CharacteristicDescriptor, DeviceAddress, ScanFilter, ServiceDescriptor,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Radio stack error type.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// No usable adapter, or the adapter lacks Bluetooth LE support
    #[error("bluetooth radio unavailable: {0}")]
    Unavailable(String),
    /// The OS or the user refused access to the radio or device
    #[error("bluetooth access denied: {0}")]
    PermissionDenied(String),
    #[error("bluetooth radio is turned off")]
    Disabled,
    #[error("device {0} is unreachable")]
    DeviceUnreachable(DeviceAddress),
    #[error("GATT protocol error: {0}")]
    Protocol(String),
    /// Wrapper around OS-level errors
    #[error("bluetooth system-level error: {0}")]
    System(String),
    /// The radio was shut down and accepts no more requests
    #[error("radio has shut down")]
    Shutdown,
}

/// Raw notifications pushed by the radio while a scan is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Advertisement(AdvertisementEvent),
    /// The scan ended, either on request or because the radio went away.
    /// Sent after the last advertisement of that scan.
    Stopped,
}

#[async_trait]
pub trait RadioStack: Send + Sync {
    /// Begin delivering advertisements matching `filter` into `events`.
    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError>;

    /// Request the active scan to end. [`RadioEvent::Stopped`] follows once
    /// the radio has dispatched its last advertisement.
    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn get_services(
        &self,
        address: DeviceAddress,
    ) -> Result<Vec<ServiceDescriptor>, RadioError>;

    async fn get_characteristics(
        &self,
        address: DeviceAddress,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicDescriptor>, RadioError>;

    /// Release cached device handles. Later requests fail with
    /// [`RadioError::Shutdown`].
    async fn shutdown(&self) {}
}
