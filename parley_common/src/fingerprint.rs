//! Device fingerprinting
//!
//! A fingerprint is a digest of client-environment signals. It is a weak
//! correlation key for abuse checks, never an authentication credential.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Bytes of the SHA-256 digest kept in the fingerprint (128 bits)
const FINGERPRINT_BYTES: usize = 16;

/// Named environment signals, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignals(BTreeMap<String, String>);

impl DeviceSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signal; empty values are recorded as "unknown"
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        let value = if value.trim().is_empty() {
            "unknown".to_string()
        } else {
            value
        };
        self.0.insert(name.to_string(), value);
        self
    }

    /// Gather signals from the current process environment
    pub fn collect() -> Self {
        let env = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| std::env::var(name).ok())
                .unwrap_or_default()
        };

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get().to_string())
            .unwrap_or_default();

        Self::new()
            .with("os", std::env::consts::OS)
            .with("family", std::env::consts::FAMILY)
            .with("arch", std::env::consts::ARCH)
            .with("hostname", env(&["HOSTNAME", "COMPUTERNAME", "HOST"]))
            .with("user", env(&["USER", "USERNAME", "LOGNAME"]))
            .with("locale", env(&["LC_ALL", "LANG", "LANGUAGE"]))
            .with("timezone", env(&["TZ"]))
            .with("cpus", cpus)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Stable identifier derived from [`DeviceSignals`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Hex digest sent to the server as `deviceId`
    pub fingerprint: String,
    /// Signals the digest was computed from
    pub components: BTreeMap<String, String>,
}

impl DeviceFingerprint {
    pub fn from_signals(signals: &DeviceSignals) -> Self {
        let joined = signals
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",");

        let digest = Sha256::digest(joined.as_bytes());

        Self {
            fingerprint: hex::encode(&digest[..FINGERPRINT_BYTES]),
            components: signals.0.clone(),
        }
    }
}

/// Per-session client state.
///
/// The fingerprint is computed on first use and reused until the session is
/// dropped or [`ClientSession::clear_fingerprint`] is called.
#[derive(Debug, Default)]
pub struct ClientSession {
    fingerprint: OnceLock<DeviceFingerprint>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of the current environment, computed once per session
    pub fn device_fingerprint(&self) -> &DeviceFingerprint {
        self.device_fingerprint_with(DeviceSignals::collect)
    }

    /// Like [`ClientSession::device_fingerprint`] with a custom signal source
    pub fn device_fingerprint_with<F>(&self, collect: F) -> &DeviceFingerprint
    where
        F: FnOnce() -> DeviceSignals,
    {
        self.fingerprint
            .get_or_init(|| DeviceFingerprint::from_signals(&collect()))
    }

    /// Forget the cached fingerprint so the next call recomputes it
    pub fn clear_fingerprint(&mut self) {
        self.fingerprint.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sample() -> DeviceSignals {
        DeviceSignals::new()
            .with("os", "linux")
            .with("arch", "x86_64")
            .with("locale", "fr_FR.UTF-8")
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = DeviceFingerprint::from_signals(&sample());
        let b = DeviceFingerprint::from_signals(&sample());
        assert_eq!(a, b);
        assert_eq!(a.fingerprint.len(), FINGERPRINT_BYTES * 2);
        assert!(a.fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_signals() {
        let a = DeviceFingerprint::from_signals(&sample());
        let b = DeviceFingerprint::from_signals(&sample().with("locale", "en_US.UTF-8"));
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_signal_order_does_not_matter() {
        let forward = DeviceSignals::new().with("a", "1").with("b", "2");
        let backward = DeviceSignals::new().with("b", "2").with("a", "1");
        assert_eq!(
            DeviceFingerprint::from_signals(&forward),
            DeviceFingerprint::from_signals(&backward)
        );
    }

    #[test]
    fn test_empty_signal_recorded_as_unknown() {
        let signals = DeviceSignals::new().with("timezone", "  ");
        let fp = DeviceFingerprint::from_signals(&signals);
        assert_eq!(fp.components.get("timezone").map(String::as_str), Some("unknown"));
    }

    #[test]
    fn test_session_caches_fingerprint() {
        let calls = Cell::new(0);
        let session = ClientSession::new();

        let first = session
            .device_fingerprint_with(|| {
                calls.set(calls.get() + 1);
                sample()
            })
            .clone();
        let second = session
            .device_fingerprint_with(|| {
                calls.set(calls.get() + 1);
                sample().with("os", "windows")
            })
            .clone();

        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_clear_fingerprint_recomputes() {
        let mut session = ClientSession::new();
        let first = session.device_fingerprint_with(sample).clone();

        session.clear_fingerprint();
        let second = session
            .device_fingerprint_with(|| sample().with("os", "windows"))
            .clone();

        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_collect_has_platform_signals() {
        let signals = DeviceSignals::collect();
        let names: Vec<&str> = signals.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"os"));
        assert!(names.contains(&"arch"));
    }
}
