//! Parley Common - Shared license wire types
//!
//! This crate contains the request/response bodies exchanged between the
//! license server and its clients, license key normalization, and the
//! device fingerprint used as a weak correlation key.

pub mod fingerprint;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use fingerprint::{ClientSession, DeviceFingerprint, DeviceSignals};

/// Normalize a human-entered license key.
///
/// Every character that is not an ASCII letter or digit is dropped and the
/// rest is uppercased, so `ab12-cd34`, `AB12 CD34` and `AB12CD34` all map to
/// the same stored key.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Request body for `POST /license/verify`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Request body for `POST /license/activate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Only required when the server enforces CAPTCHA on activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_token: Option<String>,
}

/// Request body for `POST /license/increment`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// Response body for `POST /license/increment`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementResponse {
    pub success: bool,
    pub message_count: i64,
    pub message_limit: i64,
}

/// Non-blocking notice attached to an entitlement snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ExpiringSoon,
    QuotaNearlyExhausted,
    QuotaExhausted,
    KeyMismatch,
}

/// Account or service condition the client should surface to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Entitlement snapshot returned by verify and activate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSnapshot {
    pub valid: bool,
    pub plan: String,
    pub message_limit: i64,
    pub message_count: i64,
    pub can_send_message: bool,
    pub expires_at: DateTime<Utc>,
    pub warnings: Vec<Warning>,
    pub is_banned: bool,
    pub is_suspended: bool,
    pub alerts: Vec<Alert>,
    pub maintenance_mode: bool,
}

impl LicenseSnapshot {
    /// Snapshot handed out to accounts without a bound license
    pub fn free_tier(now: DateTime<Utc>, maintenance_mode: bool) -> Self {
        let mut alerts = Vec::new();
        if maintenance_mode {
            alerts.push(Alert::maintenance());
        }

        Self {
            valid: true,
            plan: constants::FREE_PLAN.to_string(),
            message_limit: constants::FREE_MESSAGE_LIMIT,
            message_count: 0,
            can_send_message: !maintenance_mode,
            expires_at: now + Duration::days(constants::DEFAULT_VALIDITY_DAYS),
            warnings: Vec::new(),
            is_banned: false,
            is_suspended: false,
            alerts,
            maintenance_mode,
        }
    }

    /// Messages left before the quota is exhausted
    pub fn remaining_messages(&self) -> i64 {
        (self.message_limit - self.message_count).max(0)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Alert {
    pub fn maintenance() -> Self {
        Self {
            level: AlertLevel::Info,
            message: "The service is under maintenance".to_string(),
        }
    }
}

/// Request body for `POST /captcha/verify`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptchaVerifyRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Response body for `POST /captcha/verify`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaVerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<Vec<String>>,
}

/// Error body for license endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Present (and false) only on verify failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    pub error: String,
}

/// Constants shared by server and clients
pub mod constants {
    /// Plan name for accounts without a bound license
    pub const FREE_PLAN: &str = "Gratuit";

    /// Message quota for the free tier
    pub const FREE_MESSAGE_LIMIT: i64 = 10;

    /// Validity of the free tier and of keys without an explicit expiry
    pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

    /// Longest relative validity a key may carry
    pub const MAX_VALIDITY_DAYS: i64 = 36_500;

    /// Largest message quota a key may carry
    pub const MAX_MESSAGE_LIMIT: i64 = 1_000_000_000;

    /// Quota reset period
    pub const QUOTA_RESET_DAYS: i64 = 30;

    /// Warn when the license expires within this many days
    pub const EXPIRY_WARNING_DAYS: i64 = 7;

    /// Warn when usage reaches this percentage of the limit
    pub const QUOTA_WARNING_PERCENT: i64 = 80;

    /// Longest device identifier the server accepts
    pub const MAX_DEVICE_ID_LEN: usize = 128;
}
