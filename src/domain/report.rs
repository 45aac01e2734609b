//! Discovery report for a newly seen device.
//!
//! A report is built incrementally while the device's GATT profile is walked
//! and rendered once, as a single block, when the walk ends:
//!
//! ```text
//! AA:BB:CC:DD:EE:FF "Thermo" -61 dBm >>> 2 service(s)
//! - 0000180a-0000-1000-8000-00805f9b34fb
//!   00002a29-0000-1000-8000-00805f9b34fb
//!
//! - 0000180f-0000-1000-8000-00805f9b34fb
//!   00002a19-0000-1000-8000-00805f9b34fb (Battery Level)
//! ```

use crate::domain::models::{AdvertisementEvent, CharacteristicDescriptor, DeviceAddress};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSection {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    advertisement: AdvertisementEvent,
    service_count: Option<usize>,
    services: Vec<ServiceSection>,
    failure: Option<String>,
    abandoned: bool,
    show_descriptions: bool,
}

impl DiscoveryReport {
    pub fn new(advertisement: AdvertisementEvent) -> Self {
        Self {
            advertisement,
            service_count: None,
            services: Vec::new(),
            failure: None,
            abandoned: false,
            show_descriptions: true,
        }
    }

    /// Report for a device whose enumeration was cut off at shutdown
    pub fn abandoned(advertisement: AdvertisementEvent) -> Self {
        Self {
            abandoned: true,
            ..Self::new(advertisement)
        }
    }

    /// Include characteristic user descriptions when rendering
    pub fn with_descriptions(mut self, show: bool) -> Self {
        self.show_descriptions = show;
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.advertisement.address
    }

    /// Number of services the radio returned, once known
    #[cfg(test)]
    pub fn service_count(&self) -> Option<usize> {
        self.service_count
    }

    #[cfg(test)]
    pub fn services(&self) -> &[ServiceSection] {
        &self.services
    }

    pub fn record_service_count(&mut self, count: usize) {
        self.service_count = Some(count);
    }

    /// Append a service with its characteristics, in the order the radio
    /// returned them.
    pub fn push_service(&mut self, uuid: Uuid, characteristics: Vec<CharacteristicDescriptor>) {
        self.services.push(ServiceSection {
            uuid,
            characteristics,
        });
    }

    /// Mark enumeration as aborted. Sections already pushed stay in the report.
    pub fn record_failure(&mut self, reason: impl fmt::Display) {
        self.failure = Some(reason.to_string());
    }
}

impl fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >>> ", self.advertisement)?;
        if self.abandoned {
            return write!(f, "enumeration abandoned at shutdown");
        }

        let Some(count) = self.service_count else {
            let reason = self.failure.as_deref().unwrap_or("no services enumerated");
            return write!(f, "enumeration failed: {}", reason);
        };

        write!(f, "{} service(s)", count)?;

        for (i, section) in self.services.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "\n- {}", section.uuid)?;
            for characteristic in &section.characteristics {
                write!(f, "\n  {}", characteristic.uuid)?;
                if self.show_descriptions {
                    if let Some(description) = &characteristic.user_description {
                        write!(f, " ({})", description)?;
                    }
                }
            }
        }

        if let Some(reason) = &self.failure {
            write!(f, "\n!! enumeration aborted: {}", reason)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(
        uuid: u128,
        service: u128,
        description: Option<&str>,
    ) -> CharacteristicDescriptor {
        CharacteristicDescriptor {
            uuid: Uuid::from_u128(uuid),
            service_uuid: Uuid::from_u128(service),
            address: DeviceAddress::new(0xAABBCCDDEEFF),
            user_description: description.map(str::to_string),
        }
    }

    fn advertisement() -> AdvertisementEvent {
        AdvertisementEvent::new(0xAABBCCDDEEFFu64, "Tag", -70)
    }

    #[test]
    fn test_render_nested_listing() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_service_count(2);
        report.push_service(
            Uuid::from_u128(1),
            vec![characteristic(11, 1, None), characteristic(12, 1, None)],
        );
        report.push_service(Uuid::from_u128(2), vec![characteristic(21, 2, None)]);

        let expected = [
            "AA:BB:CC:DD:EE:FF \"Tag\" -70 dBm >>> 2 service(s)",
            "- 00000000-0000-0000-0000-000000000001",
            "  00000000-0000-0000-0000-00000000000b",
            "  00000000-0000-0000-0000-00000000000c",
            "",
            "- 00000000-0000-0000-0000-000000000002",
            "  00000000-0000-0000-0000-000000000015",
        ]
        .join("\n");
        assert_eq!(report.to_string(), expected);
    }

    #[test]
    fn test_render_zero_services() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_service_count(0);
        assert_eq!(
            report.to_string(),
            "AA:BB:CC:DD:EE:FF \"Tag\" -70 dBm >>> 0 service(s)"
        );
    }

    #[test]
    fn test_render_service_without_characteristics() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_service_count(1);
        report.push_service(Uuid::from_u128(1), Vec::new());
        let text = report.to_string();
        assert!(text.ends_with("- 00000000-0000-0000-0000-000000000001"));
    }

    #[test]
    fn test_render_descriptions() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_service_count(1);
        let battery = characteristic(2, 1, Some("Battery Level"));
        report.push_service(Uuid::from_u128(1), vec![battery]);
        assert!(report
            .to_string()
            .ends_with("00000000-0000-0000-0000-000000000002 (Battery Level)"));

        let hidden = report.clone().with_descriptions(false);
        assert!(!hidden.to_string().contains("Battery Level"));
    }

    #[test]
    fn test_render_service_failure() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_failure("device unreachable");
        assert_eq!(
            report.to_string(),
            "AA:BB:CC:DD:EE:FF \"Tag\" -70 dBm >>> enumeration failed: device unreachable"
        );
    }

    #[test]
    fn test_render_partial_failure_keeps_sections() {
        let mut report = DiscoveryReport::new(advertisement());
        report.record_service_count(3);
        report.push_service(Uuid::from_u128(1), vec![characteristic(11, 1, None)]);
        report.record_failure("timed out");

        let text = report.to_string();
        assert!(text.starts_with("AA:BB:CC:DD:EE:FF \"Tag\" -70 dBm >>> 3 service(s)\n- "));
        assert!(text.ends_with("\n!! enumeration aborted: timed out"));
        assert_eq!(report.services().len(), 1);
    }

    #[test]
    fn test_render_abandoned() {
        let report = DiscoveryReport::abandoned(advertisement());
        assert_eq!(
            report.to_string(),
            "AA:BB:CC:DD:EE:FF \"Tag\" -70 dBm >>> enumeration abandoned at shutdown"
        );
    }
}
