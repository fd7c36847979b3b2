//! Concrete setup steps and the standard commissioning plan.
//!
//! Every step checks its guard first and returns immediately when the
//! context already holds what it would produce, so re-running a step is
//! always safe.

pub mod barcode;
pub mod claim;
pub mod connect;
pub mod device_info;
pub mod naming;
pub mod sim;

use std::sync::Arc;

use crate::collaborators::{CloudApi, Transport};
use crate::contexts::SetupContexts;
use crate::flow::FlowPlan;
use crate::ui::FlowUi;

pub use barcode::{GetCommissionerBarcode, GetTargetBarcode};
pub use claim::{FetchClaimCode, SendClaimCode};
pub use connect::{ConnectToCommissioner, ConnectToTarget};
pub use device_info::{FetchDeviceInfo, FetchIccid, FetchNetworkInfo};
pub use naming::{GetNewDeviceName, SetNewDeviceName};
pub use sim::FetchFullSimData;

/// Collaborators injected into the steps that need them.
#[derive(Clone)]
pub struct StepDeps {
    pub cloud: Arc<dyn CloudApi>,
    pub transport: Arc<dyn Transport>,
    pub ui: FlowUi,
}

fn target_is_cellular(ctxs: &SetupContexts) -> bool {
    ctxs.target_device
        .device_type
        .get()
        .is_some_and(|t| t.is_cellular())
}

fn target_joins_existing_mesh(ctxs: &SetupContexts) -> bool {
    ctxs.target_device
        .device_type
        .get()
        .is_some_and(|t| t.joins_existing_mesh())
}

/// The full commissioning sequence.
pub fn standard_plan(deps: &StepDeps) -> FlowPlan {
    FlowPlan::new()
        .then(GetTargetBarcode)
        .then(ConnectToTarget::new(deps))
        .then(FetchDeviceInfo)
        .then_when(FetchIccid, target_is_cellular)
        .then_when(FetchFullSimData::new(deps), target_is_cellular)
        .then_when(GetCommissionerBarcode, target_joins_existing_mesh)
        .then_when(ConnectToCommissioner::new(deps), target_joins_existing_mesh)
        .then_when(FetchNetworkInfo, target_joins_existing_mesh)
        .then(FetchClaimCode::new(deps))
        .then(SendClaimCode::new(deps))
        .then(GetNewDeviceName)
        .then(SetNewDeviceName::new(deps))
}
