use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::StepDeps;
use crate::collaborators::CloudApi;
use crate::contexts::SetupContexts;
use crate::flow::{InputKind, SetupStep, StepError};
use crate::scopes::Scopes;
use crate::ui::FlowUi;

/// Waits for the user to choose a name for the device.
pub struct GetNewDeviceName;

#[async_trait]
impl SetupStep for GetNewDeviceName {
    fn name(&self) -> &'static str {
        "get_new_device_name"
    }

    async fn run_step(&self, ctxs: &SetupContexts, _scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.target_device.name_to_assign.is_set() {
            Ok(())
        } else {
            Err(StepError::NeedsInput(InputKind::DeviceName))
        }
    }
}

/// Registers the chosen name with the cloud.
pub struct SetNewDeviceName {
    cloud: Arc<dyn CloudApi>,
    ui: FlowUi,
}

impl SetNewDeviceName {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            cloud: Arc::clone(&deps.cloud),
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for SetNewDeviceName {
    fn name(&self) -> &'static str {
        "set_new_device_name"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.cloud.assigned_name.is_set() {
            return Ok(());
        }
        let device_id = ctxs.target_device.device_id.require()?;
        let name = ctxs.target_device.name_to_assign.require()?;

        let _spinner = self.ui.spinner();
        self.cloud.rename_device(&device_id, &name).await?;
        scopes.ensure_active()?;

        info!(device_id = %device_id, name = %name, "Device named");
        ctxs.cloud.assigned_name.set(name)?;
        Ok(())
    }
}
