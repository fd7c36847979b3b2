//! Collaborator contracts: external systems the engine calls but does not
//! implement.
//!
//! - [`CloudApi`]: device cloud (SIM records, claim codes, naming)
//! - [`Transport`]: wireless discovery and pairing
//! - [`DeviceSession`]: a connected, paired device
//!
//! Concrete clients are injected into steps at construction.

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;

use crate::contexts::{ClaimCode, HardwareAddress, MeshNetworkInfo, SimRecord};
use crate::error::{CloudError, TransportError};

/// Device cloud API.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Fetch the full SIM record for a card.
    async fn get_sim(&self, iccid: &str) -> Result<SimRecord, CloudError>;

    /// Create a claim code for the current account.
    async fn create_claim_code(&self) -> Result<ClaimCode, CloudError>;

    /// Assign a human-readable name to a claimed device.
    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), CloudError>;
}

/// Wireless discovery and pairing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Find an advertising device by the serial number printed on its sticker.
    async fn discover(&self, serial: &str) -> Result<HardwareAddress, TransportError>;

    /// Pair with and connect to a device using its mobile secret.
    async fn connect(
        &self,
        address: &HardwareAddress,
        mobile_secret: &str,
    ) -> Result<Arc<dyn DeviceSession>, TransportError>;
}

/// A connected session with one device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    fn address(&self) -> &HardwareAddress;

    async fn device_id(&self) -> Result<String, TransportError>;

    /// Raw platform id; see [`crate::contexts::DeviceType::from_platform_id`].
    async fn platform_id(&self) -> Result<u16, TransportError>;

    async fn iccid(&self) -> Result<String, TransportError>;

    /// Mesh network the device currently belongs to, if any.
    async fn network_info(&self) -> Result<Option<MeshNetworkInfo>, TransportError>;

    async fn set_claim_code(&self, code: &ClaimCode) -> Result<(), TransportError>;

    async fn disconnect(&self);
}
