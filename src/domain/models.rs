use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// 48-bit Bluetooth device address, stored in the low bits of a `u64`
/// the way the radio reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    const MASK: u64 = 0xFFFF_FFFF_FFFF;

    pub fn new(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DeviceAddress {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device address: {0:?}")]
pub struct AddressParseError(String);

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-..` or a plain hex number with an
    /// optional `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits: String = if trimmed.contains(':') || trimmed.contains('-') {
            let parts: Vec<&str> = trimmed.split([':', '-']).collect();
            if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                return Err(AddressParseError(s.to_string()));
            }
            parts.concat()
        } else {
            trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed)
                .to_string()
        };

        if digits.is_empty() || digits.len() > 12 {
            return Err(AddressParseError(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .map(Self)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.to_string()
    }
}

/// One observed advertisement broadcast. Immutable once produced by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    pub address: DeviceAddress,
    /// Advertised local name, empty when the peripheral sends none
    pub name: String,
    /// Raw signal strength in dBm
    pub signal_strength: i16,
    /// Transmit power level in dBm, if advertised
    pub power_level: Option<i16>,
    /// Service UUIDs listed in the advertisement itself
    pub service_uuids: Vec<Uuid>,
    /// Opaque vendor-specific payload
    pub vendor_data: Vec<u8>,
}

impl AdvertisementEvent {
    pub fn new(
        address: impl Into<DeviceAddress>,
        name: impl Into<String>,
        signal_strength: i16,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            signal_strength,
            power_level: None,
            service_uuids: Vec::new(),
            vendor_data: Vec::new(),
        }
    }
}

impl fmt::Display for AdvertisementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            "<unnamed>"
        } else {
            self.name.as_str()
        };
        write!(
            f,
            "{} \"{}\" {} dBm",
            self.address, name, self.signal_strength
        )?;
        if let Some(power) = self.power_level {
            write!(f, " (tx {} dBm)", power)?;
        }
        if !self.vendor_data.is_empty() {
            write!(f, " data=")?;
            for byte in &self.vendor_data {
                write!(f, "{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// A GATT service exposed by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
}

/// A characteristic scoped to one (device, service) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub address: DeviceAddress,
    /// Value of the Characteristic User Description descriptor, when the
    /// device exposes one
    pub user_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanningMode {
    #[default]
    Passive,
    /// Request scan responses from advertisers
    Active,
}

/// Advertisement filter handed to the radio when a scan starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Exact local-name match
    pub name: Option<String>,
    /// Service UUID that must appear in the advertisement
    pub service_uuid: Option<Uuid>,
    pub mode: ScanningMode,
}

impl ScanFilter {
    pub fn matches(&self, event: &AdvertisementEvent) -> bool {
        if let Some(name) = &self.name {
            if &event.name != name {
                return false;
            }
        }
        if let Some(uuid) = &self.service_uuid {
            if !event.service_uuids.contains(uuid) {
                return false;
            }
        }
        true
    }
}

/// Events delivered by a scan session to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    AdvertisementReceived(AdvertisementEvent),
    ScanStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let address = DeviceAddress::new(0xAABBCCDDEEFF);
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(DeviceAddress::new(0x01).to_string(), "00:00:00:00:00:01");
    }

    #[test]
    fn test_address_masks_upper_bits() {
        let address = DeviceAddress::new(0xFFFF_0011_2233_4455);
        assert_eq!(address.as_u64(), 0x0011_2233_4455);
    }

    #[test]
    fn test_address_parse() {
        let expected = DeviceAddress::new(0xAABBCCDDEEFF);
        for text in ["AA:BB:CC:DD:EE:FF", "aa-bb-cc-dd-ee-ff", "0xAABBCCDDEEFF"] {
            assert_eq!(text.parse::<DeviceAddress>().unwrap(), expected);
        }
        assert!("AA:BB:CC".parse::<DeviceAddress>().is_err());
        assert!("0x1AABBCCDDEEFF".parse::<DeviceAddress>().is_err());
        assert!("zz".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let address = DeviceAddress::new(0x112233445566);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"11:22:33:44:55:66\"");
        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_advertisement_display() {
        let mut ad = AdvertisementEvent::new(0xAABBCCDDEEFFu64, "", -61);
        assert_eq!(ad.to_string(), "AA:BB:CC:DD:EE:FF \"<unnamed>\" -61 dBm");

        ad.name = "Thermo".to_string();
        ad.power_level = Some(4);
        ad.vendor_data = vec![0x4c, 0x00];
        assert_eq!(
            ad.to_string(),
            "AA:BB:CC:DD:EE:FF \"Thermo\" -61 dBm (tx 4 dBm) data=4c00"
        );
    }

    #[test]
    fn test_filter_matches() {
        let svc = Uuid::from_u128(0x180d);
        let mut ad = AdvertisementEvent::new(1u64, "HRM", -50);

        assert!(ScanFilter::default().matches(&ad));

        let by_name = ScanFilter {
            name: Some("HRM".to_string()),
            ..Default::default()
        };
        assert!(by_name.matches(&ad));

        let by_service = ScanFilter {
            service_uuid: Some(svc),
            ..Default::default()
        };
        assert!(!by_service.matches(&ad));
        ad.service_uuids.push(svc);
        assert!(by_service.matches(&ad));

        ad.name = "Other".to_string();
        assert!(!by_name.matches(&ad));
    }
}
