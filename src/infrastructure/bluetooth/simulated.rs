//! In-memory radio stack.
//!
//! Devices, their GATT profiles and failure modes come from a [`Scenario`],
//! normally loaded from JSON:
//!
//! ```json
//! {
//!   "latency_ms": 50,
//!   "devices": [
//!     { "address": "AA:BB:CC:DD:EE:FF", "name": "Thermo", "advertisements": 3,
//!       "services": [ { "uuid": "180f", "characteristics": [ { "uuid": "2a19" } ] } ] },
//!     { "address": "11:22:33:44:55:66", "fail_services": true }
//!   ]
//! }
//! ```

use super::protocol::{deserialize_uuid, deserialize_uuid_list};
use super::radio::{RadioError, RadioEvent, RadioStack};
use crate::domain::models::{
    AdvertisementEvent, CharacteristicDescriptor, DeviceAddress, ScanFilter, ServiceDescriptor,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedCharacteristic {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedService {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub characteristics: Vec<SimulatedCharacteristic>,
    /// Characteristic discovery for this service fails
    #[serde(default)]
    pub fail_characteristics: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedDevice {
    pub address: DeviceAddress,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_signal_strength")]
    pub signal_strength: i16,
    #[serde(default)]
    pub power_level: Option<i16>,
    /// Service UUIDs carried in the advertisement payload
    #[serde(default, deserialize_with = "deserialize_uuid_list")]
    pub advertised_services: Vec<Uuid>,
    #[serde(default)]
    pub vendor_data: Vec<u8>,
    #[serde(default)]
    pub services: Vec<SimulatedService>,
    /// Service discovery for this device fails
    #[serde(default)]
    pub fail_services: bool,
    /// How many times the device advertises during a replay
    #[serde(default = "default_advertisements")]
    pub advertisements: usize,
}

fn default_signal_strength() -> i16 {
    -60
}
fn default_advertisements() -> usize {
    1
}

impl SimulatedDevice {
    pub fn new(address: impl Into<DeviceAddress>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            signal_strength: default_signal_strength(),
            power_level: None,
            advertised_services: Vec::new(),
            vendor_data: Vec::new(),
            services: Vec::new(),
            fail_services: false,
            advertisements: default_advertisements(),
        }
    }

    /// Add a service with the given characteristic UUIDs
    pub fn with_service(mut self, uuid: Uuid, characteristics: &[Uuid]) -> Self {
        self.services.push(SimulatedService {
            uuid,
            characteristics: characteristics
                .iter()
                .map(|&uuid| SimulatedCharacteristic {
                    uuid,
                    description: None,
                })
                .collect(),
            fail_characteristics: false,
        });
        self
    }

    pub fn failing_services(mut self) -> Self {
        self.fail_services = true;
        self
    }

    pub fn advertisement(&self) -> AdvertisementEvent {
        AdvertisementEvent {
            address: self.address,
            name: self.name.clone(),
            signal_strength: self.signal_strength,
            power_level: self.power_level,
            service_uuids: self.advertised_services.clone(),
            vendor_data: self.vendor_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_true")]
    pub radio_available: bool,
    /// Delay applied to every GATT call
    #[serde(default)]
    pub latency_ms: u64,
    /// Pause between advertisement rounds during a replay
    #[serde(default = "default_interval_ms")]
    pub advertisement_interval_ms: u64,
    #[serde(default)]
    pub devices: Vec<SimulatedDevice>,
}

fn default_true() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    100
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read scenario {}: {}", path.display(), e))?;
        let scenario = serde_json::from_str(&contents)?;
        Ok(scenario)
    }

    /// Advertise every device its configured number of times, round by
    /// round, while the radio is scanning.
    pub async fn replay(&self, radio: &SimulatedRadio) {
        let rounds = self
            .devices
            .iter()
            .map(|d| d.advertisements)
            .max()
            .unwrap_or(0);
        let interval = Duration::from_millis(self.advertisement_interval_ms);

        for round in 0..rounds {
            for device in self.devices.iter().filter(|d| d.advertisements > round) {
                radio.advertise(device.advertisement());
            }
            tokio::time::sleep(interval).await;
        }
        info!("Scenario replay complete ({} round(s))", rounds);
    }
}

struct ActiveScan {
    filter: ScanFilter,
    events: mpsc::UnboundedSender<RadioEvent>,
}

/// Radio stack backed by in-memory device records
pub struct SimulatedRadio {
    devices: Mutex<HashMap<DeviceAddress, SimulatedDevice>>,
    scan: Mutex<Option<ActiveScan>>,
    available: AtomicBool,
    shut_down: AtomicBool,
    latency: Duration,
    service_calls: Mutex<HashMap<DeviceAddress, usize>>,
    characteristic_calls: Mutex<HashMap<DeviceAddress, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            scan: Mutex::new(None),
            available: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            latency: Duration::ZERO,
            service_calls: Mutex::new(HashMap::new()),
            characteristic_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_scenario(scenario: &Scenario) -> Self {
        let radio = Self::new().with_latency(Duration::from_millis(scenario.latency_ms));
        radio.set_available(scenario.radio_available);
        for device in &scenario.devices {
            radio.add_device(device.clone());
        }
        radio
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn add_device(&self, device: SimulatedDevice) {
        lock(&self.devices).insert(device.address, device);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scan).is_some()
    }

    /// Deliver an advertisement to the active scan. Returns whether it passed
    /// the scan filter and was delivered.
    pub fn advertise(&self, event: AdvertisementEvent) -> bool {
        let scan = lock(&self.scan);
        match scan.as_ref() {
            Some(active) if active.filter.matches(&event) => {
                active.events.send(RadioEvent::Advertisement(event)).is_ok()
            }
            _ => false,
        }
    }

    /// Advertise a registered device using its own advertisement data
    pub fn advertise_device(&self, address: DeviceAddress) -> bool {
        let event = lock(&self.devices)
            .get(&address)
            .map(SimulatedDevice::advertisement);
        event.map(|e| self.advertise(e)).unwrap_or(false)
    }

    /// The radio stopped on its own, as when the adapter is switched off
    pub fn drop_scan(&self) {
        if let Some(active) = lock(&self.scan).take() {
            let _ = active.events.send(RadioEvent::Stopped);
        }
    }

    pub fn service_calls(&self, address: DeviceAddress) -> usize {
        lock(&self.service_calls)
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub fn characteristic_calls(&self, address: DeviceAddress) -> usize {
        lock(&self.characteristic_calls)
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    fn check_open(&self) -> Result<(), RadioError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RadioError::Shutdown);
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RadioStack for SimulatedRadio {
    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError> {
        self.check_open()?;
        if !self.available.load(Ordering::SeqCst) {
            return Err(RadioError::Unavailable("no simulated adapter".to_string()));
        }

        let mut scan = lock(&self.scan);
        if let Some(previous) = scan.take() {
            debug!("Replacing active simulated scan");
            let _ = previous.events.send(RadioEvent::Stopped);
        }
        *scan = Some(ActiveScan {
            filter: filter.clone(),
            events,
        });
        debug!("Simulated scan started with {:?}", filter);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.drop_scan();
        Ok(())
    }

    async fn get_services(
        &self,
        address: DeviceAddress,
    ) -> Result<Vec<ServiceDescriptor>, RadioError> {
        self.check_open()?;
        *lock(&self.service_calls).entry(address).or_insert(0) += 1;
        self.simulate_latency().await;

        let devices = lock(&self.devices);
        let device = devices
            .get(&address)
            .ok_or(RadioError::DeviceUnreachable(address))?;
        if device.fail_services {
            return Err(RadioError::Protocol(
                "simulated service discovery failure".to_string(),
            ));
        }

        Ok(device
            .services
            .iter()
            .map(|s| ServiceDescriptor { uuid: s.uuid })
            .collect())
    }

    async fn get_characteristics(
        &self,
        address: DeviceAddress,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicDescriptor>, RadioError> {
        self.check_open()?;
        *lock(&self.characteristic_calls)
            .entry(address)
            .or_insert(0) += 1;
        self.simulate_latency().await;

        let devices = lock(&self.devices);
        let device = devices
            .get(&address)
            .ok_or(RadioError::DeviceUnreachable(address))?;
        let service = device
            .services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| RadioError::Protocol(format!("service {} not found", service_uuid)))?;
        if service.fail_characteristics {
            return Err(RadioError::Protocol(
                "simulated characteristic discovery failure".to_string(),
            ));
        }

        Ok(service
            .characteristics
            .iter()
            .map(|c| CharacteristicDescriptor {
                uuid: c.uuid,
                service_uuid,
                address,
                user_description: c.description.clone(),
            })
            .collect())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.drop_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gatt::from_short;

    #[tokio::test]
    async fn test_start_fails_without_adapter() {
        let radio = SimulatedRadio::new();
        radio.set_available(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = radio.start_scan(&ScanFilter::default(), tx).await;
        assert!(matches!(result, Err(RadioError::Unavailable(_))));
        assert!(!radio.is_scanning());
    }

    #[tokio::test]
    async fn test_advertise_respects_filter_and_stop_order() {
        let radio = SimulatedRadio::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let filter = ScanFilter {
            name: Some("Keep".to_string()),
            ..Default::default()
        };
        radio.start_scan(&filter, tx).await.unwrap();

        assert!(radio.advertise(AdvertisementEvent::new(1u64, "Keep", -40)));
        assert!(!radio.advertise(AdvertisementEvent::new(2u64, "Skip", -40)));
        radio.stop_scan().await.unwrap();
        radio.stop_scan().await.unwrap();

        let first = rx.recv().await;
        assert!(matches!(first, Some(RadioEvent::Advertisement(ad)) if ad.name == "Keep"));
        assert_eq!(rx.recv().await, Some(RadioEvent::Stopped));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_profile_lookup_and_call_counts() {
        let radio = SimulatedRadio::new();
        let address = DeviceAddress::new(0xAABBCCDDEEFF);
        radio.add_device(
            SimulatedDevice::new(address, "Thermo")
                .with_service(from_short(0x180f), &[from_short(0x2a19)]),
        );

        let services = radio.get_services(address).await.unwrap();
        let expected = ServiceDescriptor {
            uuid: from_short(0x180f),
        };
        assert_eq!(services, vec![expected]);

        let characteristics = radio
            .get_characteristics(address, from_short(0x180f))
            .await
            .unwrap();
        assert_eq!(characteristics.len(), 1);
        assert_eq!(characteristics[0].service_uuid, from_short(0x180f));
        assert_eq!(characteristics[0].address, address);

        assert_eq!(radio.service_calls(address), 1);
        assert_eq!(radio.characteristic_calls(address), 1);

        let unknown = DeviceAddress::new(9);
        assert_eq!(
            radio.get_services(unknown).await,
            Err(RadioError::DeviceUnreachable(unknown))
        );
    }

    #[tokio::test]
    async fn test_shutdown_refuses_requests() {
        let radio = SimulatedRadio::new();
        radio.shutdown().await;
        assert_eq!(
            radio.get_services(DeviceAddress::new(1)).await,
            Err(RadioError::Shutdown)
        );
    }

    #[test]
    fn test_scenario_parse() {
        let json = r#"{
            "latency_ms": 5,
            "devices": [
                { "address": "AA:BB:CC:DD:EE:FF", "name": "Thermo", "advertisements": 3,
                  "advertised_services": ["180f"],
                  "services": [ { "uuid": "180f", "characteristics": [
                      { "uuid": "2a19", "description": "Battery Level" } ] } ] },
                { "address": "0x112233445566", "fail_services": true }
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert!(scenario.radio_available);
        assert_eq!(scenario.advertisement_interval_ms, 100);
        assert_eq!(scenario.devices.len(), 2);

        let thermo = &scenario.devices[0];
        assert_eq!(thermo.advertisements, 3);
        assert_eq!(thermo.advertised_services, vec![from_short(0x180f)]);
        assert_eq!(
            thermo.services[0].characteristics[0].description.as_deref(),
            Some("Battery Level")
        );

        let failing = &scenario.devices[1];
        assert_eq!(failing.address, DeviceAddress::new(0x112233445566));
        assert!(failing.fail_services);
        assert_eq!(failing.signal_strength, -60);
    }

    #[tokio::test]
    async fn test_replay_advertises_each_round() {
        let mut scenario: Scenario = serde_json::from_str(
            r#"{ "advertisement_interval_ms": 1,
                 "devices": [ { "address": "00:00:00:00:00:01", "advertisements": 2 },
                              { "address": "00:00:00:00:00:02" } ] }"#,
        )
        .unwrap();
        scenario.devices[1].name = "Second".to_string();

        let radio = SimulatedRadio::from_scenario(&scenario);
        let (tx, mut rx) = mpsc::unbounded_channel();
        radio.start_scan(&ScanFilter::default(), tx).await.unwrap();
        scenario.replay(&radio).await;
        radio.stop_scan().await.unwrap();

        let mut addresses = Vec::new();
        while let Some(RadioEvent::Advertisement(ad)) = rx.recv().await {
            addresses.push(ad.address.as_u64());
        }
        assert_eq!(addresses, vec![1, 2, 1]);
    }
}
