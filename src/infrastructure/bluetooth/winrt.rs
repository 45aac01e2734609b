//! Radio stack on top of `Windows.Devices.Bluetooth`.

use crate::domain::gatt::USER_DESCRIPTION_UUID;
use crate::domain::models::{
    AdvertisementEvent, CharacteristicDescriptor, DeviceAddress, ScanFilter, ScanningMode,
    ServiceDescriptor,
};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{RadioError, RadioEvent, RadioStack};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::HSTRING;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementFilter, BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementWatcher, BluetoothLEAdvertisementWatcherStoppedEventArgs,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothError, BluetoothLEDevice,
};
use windows::Devices::Radios::{Radio, RadioAccessStatus, RadioState};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

impl From<windows::core::Error> for RadioError {
    fn from(e: windows::core::Error) -> Self {
        RadioError::System(e.to_string())
    }
}

fn check_status(status: GattCommunicationStatus, address: DeviceAddress) -> Result<(), RadioError> {
    match status {
        GattCommunicationStatus::Success => Ok(()),
        GattCommunicationStatus::Unreachable => Err(RadioError::DeviceUnreachable(address)),
        GattCommunicationStatus::AccessDenied => Err(RadioError::PermissionDenied(format!(
            "GATT access to {} denied",
            address
        ))),
        other => Err(RadioError::Protocol(format!("GATT status {:?}", other))),
    }
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn to_advertisement(
    args: &BluetoothLEAdvertisementReceivedEventArgs,
) -> windows::core::Result<AdvertisementEvent> {
    let adv = args.Advertisement()?;
    let mut event = AdvertisementEvent::new(
        args.BluetoothAddress()?,
        adv.LocalName()?.to_string(),
        args.RawSignalStrengthInDBm()?,
    );

    event.power_level = args
        .TransmitPowerLevelInDBm()
        .and_then(|power| power.Value())
        .ok();

    let service_uuids = adv.ServiceUuids()?;
    for i in 0..service_uuids.Size()? {
        event
            .service_uuids
            .push(protocol::from_guid(&service_uuids.GetAt(i)?));
    }

    // Company id (little endian) followed by the payload, per section
    let sections = adv.ManufacturerData()?;
    for i in 0..sections.Size()? {
        let section = sections.GetAt(i)?;
        event
            .vendor_data
            .extend_from_slice(&section.CompanyId()?.to_le_bytes());
        event.vendor_data.extend(read_buffer(&section.Data()?)?);
    }

    Ok(event)
}

/// WinRT-backed radio
pub struct WinRtRadio {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    devices: Mutex<HashMap<DeviceAddress, BluetoothLEDevice>>,
    shut_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WinRtRadio {
    pub fn new() -> Self {
        Self {
            watcher: Mutex::new(None),
            devices: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Fail early when there is no LE adapter, the radio is off, or access
    /// is refused. The watcher itself would only report this by stopping.
    async fn ensure_radio_ready(&self) -> Result<(), RadioError> {
        let adapter = BluetoothAdapter::GetDefaultAsync()?
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;

        if !adapter.IsLowEnergySupported()? {
            return Err(RadioError::Unavailable(
                "adapter does not support Bluetooth LE".to_string(),
            ));
        }

        let access = Radio::RequestAccessAsync()?.await?;
        if access != RadioAccessStatus::Allowed {
            return Err(RadioError::PermissionDenied(format!(
                "radio access status {:?}",
                access
            )));
        }

        let radio = adapter.GetRadioAsync()?.await?;
        match radio.State()? {
            RadioState::On => Ok(()),
            RadioState::Off | RadioState::Disabled => Err(RadioError::Disabled),
            other => Err(RadioError::Unavailable(format!("radio state {:?}", other))),
        }
    }

    /// Open the device, reusing the cached handle when there is one
    async fn device(&self, address: DeviceAddress) -> Result<BluetoothLEDevice, RadioError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RadioError::Shutdown);
        }

        let cached = lock(&self.devices).get(&address).cloned();
        if let Some(device) = cached {
            return Ok(device);
        }

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address.as_u64())?
            .await
            .map_err(|e| {
                debug!(%address, "Failed to open device: {}", e);
                RadioError::DeviceUnreachable(address)
            })?;
        lock(&self.devices).insert(address, device.clone());
        Ok(device)
    }

    /// Read the Characteristic User Description, if the device has one
    async fn user_description(
        characteristic: &GattCharacteristic,
    ) -> windows::core::Result<Option<String>> {
        let result = characteristic
            .GetDescriptorsForUuidWithCacheModeAsync(
                protocol::to_guid(&USER_DESCRIPTION_UUID),
                BluetoothCacheMode::Uncached,
            )?
            .await?;
        let descriptors = result.Descriptors()?;
        if descriptors.Size()? == 0 {
            return Ok(None);
        }

        let value = descriptors
            .GetAt(0)?
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if value.Status()? != GattCommunicationStatus::Success {
            return Ok(None);
        }

        let bytes = read_buffer(&value.Value()?)?;
        let text = String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string();
        Ok(Some(text).filter(|t| !t.is_empty()))
    }
}

impl Default for WinRtRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioStack for WinRtRadio {
    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RadioError::Shutdown);
        }
        self.ensure_radio_ready().await?;

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(match filter.mode {
            ScanningMode::Active => BluetoothLEScanningMode::Active,
            ScanningMode::Passive => BluetoothLEScanningMode::Passive,
        })?;

        let advertisement_filter = BluetoothLEAdvertisementFilter::new()?;
        if let Some(name) = &filter.name {
            advertisement_filter
                .Advertisement()?
                .SetLocalName(&HSTRING::from(name.as_str()))?;
        }
        if let Some(uuid) = &filter.service_uuid {
            advertisement_filter
                .Advertisement()?
                .ServiceUuids()?
                .Append(protocol::to_guid(uuid))?;
        }
        watcher.SetAdvertisementFilter(&advertisement_filter)?;

        let sender = events.clone();
        let received = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let _ = sender.send(RadioEvent::Advertisement(to_advertisement(args)?));
                }
                Ok(())
            },
        );
        watcher.Received(&received)?;

        let stopped = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(error) = args.as_ref().and_then(|a| a.Error().ok()) {
                    if error != BluetoothError::Success {
                        warn!("Advertisement watcher stopped with {:?}", error);
                    }
                }
                let _ = events.send(RadioEvent::Stopped);
                Ok(())
            },
        );
        watcher.Stopped(&stopped)?;

        watcher.Start()?;
        info!("Advertisement watcher started");

        if let Some(previous) = lock(&self.watcher).replace(watcher) {
            let _ = previous.Stop();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            watcher.Stop()?;
        }
        Ok(())
    }

    async fn get_services(
        &self,
        address: DeviceAddress,
    ) -> Result<Vec<ServiceDescriptor>, RadioError> {
        let device = self.device(address).await?;

        let mut result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if result.Status()? == GattCommunicationStatus::Unreachable {
            debug!(%address, "Uncached service query unreachable, using system cache");
            result = device
                .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Cached)?
                .await?;
        }
        check_status(result.Status()?, address)?;

        let services = result.Services()?;
        let mut descriptors = Vec::with_capacity(services.Size()? as usize);
        for i in 0..services.Size()? {
            let uuid = services.GetAt(i)?.Uuid()?;
            descriptors.push(ServiceDescriptor {
                uuid: protocol::from_guid(&uuid),
            });
        }
        Ok(descriptors)
    }

    async fn get_characteristics(
        &self,
        address: DeviceAddress,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicDescriptor>, RadioError> {
        let device = self.device(address).await?;

        let services = device
            .GetGattServicesForUuidWithCacheModeAsync(
                protocol::to_guid(&service_uuid),
                BluetoothCacheMode::Uncached,
            )?
            .await?;
        check_status(services.Status()?, address)?;
        let services = services.Services()?;
        if services.Size()? == 0 {
            return Err(RadioError::Protocol(format!(
                "service {} not found",
                service_uuid
            )));
        }
        let service = services.GetAt(0)?;

        let result = service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, address)?;

        let characteristics = result.Characteristics()?;
        let mut descriptors = Vec::with_capacity(characteristics.Size()? as usize);
        for i in 0..characteristics.Size()? {
            let characteristic = characteristics.GetAt(i)?;
            let user_description = match Self::user_description(&characteristic).await {
                Ok(description) => description,
                Err(e) => {
                    debug!(%address, "Could not read user description: {}", e);
                    None
                }
            };
            descriptors.push(CharacteristicDescriptor {
                uuid: protocol::from_guid(&characteristic.Uuid()?),
                service_uuid,
                address,
                user_description,
            });
        }
        Ok(descriptors)
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Some(watcher) = lock(&self.watcher).take() {
            let _ = watcher.Stop();
        }
        for (_, device) in lock(&self.devices).drain() {
            let _ = device.Close();
        }
        info!("Radio shut down, device cache cleared");
    }
}
