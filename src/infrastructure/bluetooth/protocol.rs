//! UUID adapters for the radio backends: serde helpers for scenario files and
//! Windows GUID conversion.

use crate::domain::gatt::parse_uuid;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Serde helper accepting the same forms as [`parse_uuid`]
pub fn deserialize_uuid<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_uuid(&raw).map_err(serde::de::Error::custom)
}

pub fn deserialize_uuid_list<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| parse_uuid(s).map_err(serde::de::Error::custom))
        .collect()
}

/// Convert to a Windows GUID
#[cfg(windows)]
pub fn to_guid(uuid: &Uuid) -> windows::core::GUID {
    windows::core::GUID::from_u128(uuid.as_u128())
}

#[cfg(windows)]
pub fn from_guid(guid: &windows::core::GUID) -> Uuid {
    Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4)
}
