//! Bluetooth SIG UUID constants and parsing

use uuid::Uuid;

/// Bluetooth SIG base UUID; 16-bit assigned numbers live in bits 96..112
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Characteristic User Description descriptor (0x2901)
pub const USER_DESCRIPTION_UUID: Uuid = from_short(0x2901);

/// Expand a 16-bit SIG assigned number into its 128-bit UUID
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Parse either a full UUID or a 4-digit SIG short form such as `180d`
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, uuid::Error> {
    let trimmed = uuid_str.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if short.len() == 4 {
        if let Ok(value) = u16::from_str_radix(short, 16) {
            return Ok(from_short(value));
        }
    }

    Uuid::parse_str(trimmed)
}
