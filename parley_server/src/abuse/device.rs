//! Device identifier validation
//!
//! Device ids are client-computed fingerprints. The server only checks
//! their shape so they can be used safely as rate-limit keys.

use parley_common::constants::MAX_DEVICE_ID_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdRejection {
    Missing,
    TooLong,
    InvalidCharacters,
}

impl DeviceIdRejection {
    pub fn message(&self) -> String {
        match self {
            DeviceIdRejection::Missing => "Device ID is required".to_string(),
            DeviceIdRejection::TooLong => {
                format!("Device ID must be {} characters or less", MAX_DEVICE_ID_LEN)
            }
            DeviceIdRejection::InvalidCharacters => {
                "Device ID can only contain letters, numbers, hyphens, and underscores".to_string()
            }
        }
    }
}

/// Check a device id and return it trimmed
pub fn check_device_id(device_id: Option<&str>) -> Result<&str, DeviceIdRejection> {
    let device_id = device_id.map(str::trim).unwrap_or_default();

    if device_id.is_empty() {
        return Err(DeviceIdRejection::Missing);
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(DeviceIdRejection::TooLong);
    }
    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DeviceIdRejection::InvalidCharacters);
    }

    Ok(device_id)
}
