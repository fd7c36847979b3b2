use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::StepDeps;
use crate::collaborators::CloudApi;
use crate::contexts::SetupContexts;
use crate::flow::{SetupStep, StepError};
use crate::scopes::Scopes;
use crate::ui::FlowUi;

/// Fetches the full SIM record for the target's ICCID from the cloud.
pub struct FetchFullSimData {
    cloud: Arc<dyn CloudApi>,
    ui: FlowUi,
}

impl FetchFullSimData {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            cloud: Arc::clone(&deps.cloud),
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for FetchFullSimData {
    fn name(&self) -> &'static str {
        "fetch_full_sim_data"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        let target = &ctxs.target_device;
        if target.sim.is_set() {
            debug!("SIM record already known");
            return Ok(());
        }
        let iccid = target.iccid.require()?;

        let _spinner = self.ui.spinner();
        let sim = self.cloud.get_sim(&iccid).await?;
        scopes.ensure_active()?;

        info!(iccid = %sim.iccid, status = ?sim.status, "SIM record fetched");
        target.sim.set(sim)?;
        Ok(())
    }
}
