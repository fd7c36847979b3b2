//! Binding the target to the user's cloud account.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::StepDeps;
use crate::collaborators::CloudApi;
use crate::contexts::SetupContexts;
use crate::flow::{SetupStep, StepError};
use crate::scopes::Scopes;
use crate::ui::FlowUi;

/// Requests a claim code from the cloud.
pub struct FetchClaimCode {
    cloud: Arc<dyn CloudApi>,
    ui: FlowUi,
}

impl FetchClaimCode {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            cloud: Arc::clone(&deps.cloud),
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for FetchClaimCode {
    fn name(&self) -> &'static str {
        "fetch_claim_code"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.cloud.claim_code.is_set() {
            return Ok(());
        }

        let _spinner = self.ui.spinner();
        let code = self.cloud.create_claim_code().await?;
        scopes.ensure_active()?;
        ctxs.cloud.claim_code.set(code)?;
        Ok(())
    }
}

/// Hands the claim code to the target over its session.
pub struct SendClaimCode {
    ui: FlowUi,
}

impl SendClaimCode {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for SendClaimCode {
    fn name(&self) -> &'static str {
        "send_claim_code"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.cloud.claim_code_sent.get().unwrap_or(false) {
            return Ok(());
        }
        let code = ctxs.cloud.claim_code.require()?;
        let session = ctxs.target_device.session.require()?;

        let _spinner = self.ui.spinner();
        session.set_claim_code(&code).await?;
        scopes.ensure_active()?;
        ctxs.cloud.claim_code_sent.set(true)?;

        info!(address = %session.address(), "Claim code delivered");
        Ok(())
    }
}
