//! Values discovered or decided during a setup flow.

use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Maximum length of a device name accepted by the cloud.
pub const MAX_DEVICE_NAME_LEN: usize = 63;

static DEVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

static SERIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{6,32}$").expect("static regex"));

/// Contents of the data-matrix sticker on a device: serial number and the
/// mobile secret used to pair with it.
#[derive(Clone)]
pub struct BarcodeData {
    pub serial_number: String,
    pub mobile_secret: SecretString,
}

impl BarcodeData {
    /// Parse a scanned `"<serial> <mobile secret>"` payload.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut parts = raw.split_whitespace();
        let (Some(serial), Some(secret), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err("expected \"<serial> <mobile secret>\"".to_string());
        };

        let serial = serial.to_ascii_uppercase();
        if !SERIAL_RE.is_match(&serial) {
            return Err(format!("malformed serial number {serial:?}"));
        }

        Ok(Self {
            serial_number: serial,
            mobile_secret: SecretString::from(secret.to_string()),
        })
    }

    /// Whether both barcodes belong to the same physical device.
    pub fn same_device(&self, other: &BarcodeData) -> bool {
        self.serial_number == other.serial_number
    }

    pub fn mobile_secret(&self) -> &str {
        self.mobile_secret.expose_secret()
    }
}

impl std::fmt::Debug for BarcodeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarcodeData")
            .field("serial_number", &self.serial_number)
            .field("mobile_secret", &"[REDACTED]")
            .finish()
    }
}

/// Hardware family of a device, from its platform id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Wi-Fi gateway.
    Argon,
    /// Cellular gateway.
    Boron,
    /// Mesh-only endpoint.
    Xenon,
    Unknown(u16),
}

impl DeviceType {
    pub fn from_platform_id(id: u16) -> Self {
        match id {
            12 => Self::Argon,
            13 => Self::Boron,
            14 => Self::Xenon,
            other => Self::Unknown(other),
        }
    }

    pub fn is_cellular(&self) -> bool {
        matches!(self, Self::Boron)
    }

    /// Mesh-only devices join an existing network through a commissioner.
    pub fn joins_existing_mesh(&self) -> bool {
        matches!(self, Self::Xenon)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Argon => write!(f, "argon"),
            Self::Boron => write!(f, "boron"),
            Self::Xenon => write!(f, "xenon"),
            Self::Unknown(id) => write!(f, "unknown({id})"),
        }
    }
}

/// Activation state of a SIM card as reported by the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    Active,
    Inactive,
    Paused,
    NeverActivated,
}

/// Full SIM record fetched from the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRecord {
    pub iccid: String,
    pub status: SimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_limit_mb: Option<u32>,
}

/// Hardware address of an advertising device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareAddress(pub String);

impl std::fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address a device was found at, keyed by the serial it was looked up for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub serial_number: String,
    pub address: HardwareAddress,
}

impl DiscoveredDevice {
    /// Whether this result belongs to the device on `barcode`.
    pub fn matches(&self, barcode: &BarcodeData) -> bool {
        self.serial_number == barcode.serial_number
    }
}

/// One-time code that binds a device to the user's cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCode(pub String);

/// Mesh network the commissioner belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshNetworkInfo {
    pub name: String,
    pub ext_pan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

/// Normalize a user-typed device name: trim, replace inner spaces with `_`,
/// then check length and charset.
pub fn normalize_device_name(raw: &str) -> Result<String, String> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join("_");
    if name.is_empty() {
        return Err("name is empty".to_string());
    }
    if name.len() > MAX_DEVICE_NAME_LEN {
        return Err(format!(
            "name is {} characters, at most {MAX_DEVICE_NAME_LEN} allowed",
            name.len()
        ));
    }
    if !DEVICE_NAME_RE.is_match(&name) {
        return Err(format!("{name:?} may only contain letters, digits, '_' and '-'"));
    }
    Ok(name)
}
