//! Setup contexts, the shared record of one commissioning session.
//!
//! Split into sub-contexts by subject. Every field is a [`Slot`]: populated
//! at most once by steps, overwritten only through explicit user input or
//! when a re-scan leaves a cached discovery result stale.
//! Steps and UI entry points may touch it from different threads, so each
//! slot carries its own lock; none is ever held across an `.await`.

pub mod model;
pub mod slot;

use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::DeviceSession;

pub use model::{
    BarcodeData, ClaimCode, DeviceType, DiscoveredDevice, HardwareAddress, MeshNetworkInfo,
    SimRecord, SimStatus,
};
pub use slot::Slot;

/// The device being commissioned.
#[derive(Debug)]
pub struct TargetDeviceContext {
    pub barcode: Slot<BarcodeData>,
    pub discovered: Slot<DiscoveredDevice>,
    pub session: Slot<Arc<dyn DeviceSession>>,
    pub device_id: Slot<String>,
    pub device_type: Slot<DeviceType>,
    pub iccid: Slot<String>,
    pub sim: Slot<SimRecord>,
    pub name_to_assign: Slot<String>,
}

impl Default for TargetDeviceContext {
    fn default() -> Self {
        Self {
            barcode: Slot::new("target_device.barcode"),
            discovered: Slot::new("target_device.discovered"),
            session: Slot::new("target_device.session"),
            device_id: Slot::new("target_device.device_id"),
            device_type: Slot::new("target_device.device_type"),
            iccid: Slot::new("target_device.iccid"),
            sim: Slot::new("target_device.sim"),
            name_to_assign: Slot::new("target_device.name_to_assign"),
        }
    }
}

/// An already-provisioned device that vouches for the target on its mesh.
#[derive(Debug)]
pub struct CommissionerContext {
    pub barcode: Slot<BarcodeData>,
    pub discovered: Slot<DiscoveredDevice>,
    pub session: Slot<Arc<dyn DeviceSession>>,
}

impl Default for CommissionerContext {
    fn default() -> Self {
        Self {
            barcode: Slot::new("commissioner.barcode"),
            discovered: Slot::new("commissioner.discovered"),
            session: Slot::new("commissioner.session"),
        }
    }
}

#[derive(Debug)]
pub struct NetworkContext {
    /// Mesh network the target will join, as reported by the commissioner.
    pub target_network: Slot<MeshNetworkInfo>,
}

impl Default for NetworkContext {
    fn default() -> Self {
        Self {
            target_network: Slot::new("network.target_network"),
        }
    }
}

#[derive(Debug)]
pub struct CloudContext {
    pub claim_code: Slot<ClaimCode>,
    /// Set once the claim code has been delivered to the device.
    pub claim_code_sent: Slot<bool>,
    /// Name the cloud confirmed for the device.
    pub assigned_name: Slot<String>,
}

impl Default for CloudContext {
    fn default() -> Self {
        Self {
            claim_code: Slot::new("cloud.claim_code"),
            claim_code_sent: Slot::new("cloud.claim_code_sent"),
            assigned_name: Slot::new("cloud.assigned_name"),
        }
    }
}

/// Everything learned or decided during one flow.
#[derive(Debug, Default)]
pub struct SetupContexts {
    pub target_device: TargetDeviceContext,
    pub commissioner: CommissionerContext,
    pub network: NetworkContext,
    pub cloud: CloudContext,
}

impl SetupContexts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serializable view for observers and logs. Secrets and sessions are
    /// reduced to presence flags.
    pub fn summary(&self) -> ContextSummary {
        let target = &self.target_device;
        ContextSummary {
            target_serial: target.barcode.get().map(|b| b.serial_number),
            target_connected: target.session.is_set(),
            device_id: target.device_id.get(),
            device_type: target.device_type.get(),
            iccid: target.iccid.get(),
            sim: target.sim.get(),
            name_to_assign: target.name_to_assign.get(),
            commissioner_serial: self.commissioner.barcode.get().map(|b| b.serial_number),
            commissioner_connected: self.commissioner.session.is_set(),
            target_network: self.network.target_network.get(),
            claim_code_sent: self.cloud.claim_code_sent.get().unwrap_or(false),
            assigned_name: self.cloud.assigned_name.get(),
        }
    }
}

/// Snapshot of the setup contexts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_serial: Option<String>,
    pub target_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim: Option<SimRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_to_assign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commissioner_serial: Option<String>,
    pub commissioner_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_network: Option<MeshNetworkInfo>,
    pub claim_code_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_name: Option<String>,
}
