use serde::{Deserialize, Serialize};
use serde_repr::Serialize_repr;
use serde_valid::Validate;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Session
// ============================================================================

/// Remote session record linking a device to its confirmation events
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProvisioningSession {
    #[serde(rename = "sessionToken")]
    pub token: String,
    #[serde(rename = "objectId")]
    pub id: String,
}

/// Identifier minted once per attempt and echoed back by the device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstallationId(Uuid);

impl InstallationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstallationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Device and network identity
// ============================================================================

/// Longest SSID 802.11 allows, in bytes
pub const MAX_SSID_BYTES: usize = 32;

fn ssid_fits(ssid: &str) -> Result<(), serde_valid::validation::Error> {
    if ssid.len() > MAX_SSID_BYTES {
        return Err(serde_valid::validation::Error::Custom(format!(
            "ssid is {} bytes long, at most {MAX_SSID_BYTES} are allowed",
            ssid.len()
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    pub object_id: String,
    pub identifier: String,
}

/// Target identity of the device being provisioned
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[validate(min_length = 1)]
    pub name: String,
    #[validate(min_length = 1)]
    #[validate(custom = ssid_fits)]
    pub ssid: String,
    #[validate(pattern = r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$")]
    pub bssid: String,
    pub model: Option<DeviceModel>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_repr, Deserialize)]
#[serde(from = "u8")]
#[repr(u8)]
pub enum SecurityMode {
    #[default]
    Open = 0,
    Wep = 1,
    Wpa = 2,
}

impl SecurityMode {
    /// Single character code understood by the device firmware
    pub fn code(self) -> &'static str {
        match self {
            SecurityMode::Open => "0",
            SecurityMode::Wep => "1",
            SecurityMode::Wpa => "2",
        }
    }
}

impl From<u8> for SecurityMode {
    fn from(code: u8) -> Self {
        match code {
            1 => SecurityMode::Wep,
            2 => SecurityMode::Wpa,
            _ => SecurityMode::Open,
        }
    }
}

/// Home network the device should join after provisioning
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct NetworkCredentials {
    #[validate(min_length = 1)]
    #[validate(custom = ssid_fits)]
    pub ssid: String,
    pub password: String,
    pub security: SecurityMode,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .finish()
    }
}

// ============================================================================
// Access points
// ============================================================================

/// OS handle of a configured network profile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NetworkHandle(pub i32);

impl NetworkHandle {
    /// Reported when the phone is not associated with any configured network
    pub const NONE: NetworkHandle = NetworkHandle(-1);
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccessPointRecord {
    pub ssid: String,
    pub bssid: Option<String>,
    pub handle: NetworkHandle,
}

/// Network profile registered with the OS
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkProfile {
    pub ssid: String,
    pub bssid: Option<String>,
    pub priority: i32,
    pub open: bool,
}

// ============================================================================
// Platforms
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Cc3200,
}

impl Platform {
    const SSID_PREFIXES: [(&str, Platform); 1] = [("TL04-", Platform::Cc3200)];

    /// Detect the device platform from its access point name
    ///
    /// The prefix is everything up to and including the first `-`.
    pub fn from_ssid(ssid: &str) -> Option<Self> {
        let index = ssid.find('-')?;
        let prefix = &ssid[..=index];

        Self::SSID_PREFIXES
            .iter()
            .find(|(known, _)| *known == prefix)
            .map(|(_, platform)| *platform)
    }

    pub fn is_supported(ssid: &str) -> bool {
        Self::from_ssid(ssid).is_some()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// How the confirmation stage ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// The device did not report within the window; it may just be slow
    TimedOut,
}

/// Result of a successful attempt
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisioningReport {
    pub session: ProvisioningSession,
    pub installation_id: InstallationId,
    pub confirmation: Confirmation,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> DeviceConfig {
        DeviceConfig {
            name: "Lamp".to_string(),
            ssid: "TL04-Light-ab12".to_string(),
            bssid: "AA:BB:CC:DD:EE:FF".to_string(),
            model: None,
        }
    }

    #[test]
    fn test_valid_device_config_passes_validation() {
        assert!(lamp().validate().is_ok());
    }

    #[test]
    fn test_malformed_bssid_fails_validation() {
        let config = DeviceConfig {
            bssid: "AA:BB:CC".to_string(),
            ..lamp()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_name_fails_validation() {
        let config = DeviceConfig {
            name: String::new(),
            ..lamp()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssid_length_counts_bytes() {
        // 17 characters, 34 bytes
        let ssid = "\u{e9}".repeat(17);

        let config = DeviceConfig {
            ssid: ssid.clone(),
            ..lamp()
        };
        assert!(config.validate().is_err());

        let credentials = NetworkCredentials {
            ssid,
            password: String::new(),
            security: SecurityMode::Open,
        };
        assert!(credentials.validate().is_err());
    }

    #[test]
    fn test_ssid_length_accepts_32_bytes() {
        let credentials = NetworkCredentials {
            ssid: "\u{e9}".repeat(16),
            password: String::new(),
            security: SecurityMode::Open,
        };
        assert!(credentials.validate().is_ok());
    }

    #[test]
    fn test_security_mode_codes() {
        assert_eq!(SecurityMode::Open.code(), "0");
        assert_eq!(SecurityMode::Wep.code(), "1");
        assert_eq!(SecurityMode::Wpa.code(), "2");
    }

    #[test]
    fn test_unknown_security_mode_falls_back_to_open() {
        let credentials: NetworkCredentials =
            serde_json::from_str(r#"{"ssid":"HomeNet","password":"x","security":7}"#)
                .expect("should parse");
        assert_eq!(credentials.security, SecurityMode::Open);

        let credentials: NetworkCredentials =
            serde_json::from_str(r#"{"ssid":"HomeNet","password":"x","security":2}"#)
                .expect("should parse");
        assert_eq!(credentials.security, SecurityMode::Wpa);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = NetworkCredentials {
            ssid: "HomeNet".to_string(),
            password: "secret123".to_string(),
            security: SecurityMode::Wpa,
        };
        assert!(!format!("{credentials:?}").contains("secret123"));
    }

    #[test]
    fn test_session_parses_backend_fields() {
        let session: ProvisioningSession =
            serde_json::from_str(r#"{"objectId":"s1","sessionToken":"r:abc"}"#)
                .expect("should parse");
        assert_eq!(session.id, "s1");
        assert_eq!(session.token, "r:abc");
    }

    #[test]
    fn test_platform_detection_uses_prefix_up_to_first_dash() {
        assert_eq!(Platform::from_ssid("TL04-Light-ab12"), Some(Platform::Cc3200));
        assert_eq!(Platform::from_ssid("TL04"), None);
        assert_eq!(Platform::from_ssid("XX01-Light"), None);
        assert!(!Platform::is_supported("HomeNet"));
    }

    #[test]
    fn test_installation_ids_are_unique() {
        assert_ne!(InstallationId::new(), InstallationId::new());
    }
}
