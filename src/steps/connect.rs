//! Discovery and pairing for the target and commissioner devices.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::StepDeps;
use crate::collaborators::{DeviceSession, Transport};
use crate::contexts::{BarcodeData, DiscoveredDevice, SetupContexts, Slot};
use crate::error::TransportError;
use crate::flow::{InputKind, SetupStep, StepError};
use crate::scopes::Scopes;
use crate::ui::FlowUi;

/// Slots of one side of the connection, target or commissioner.
struct Endpoint<'a> {
    role: &'static str,
    /// Prompt that replaces a barcode the device refused to pair with.
    rescan: InputKind,
    barcode: &'a Slot<BarcodeData>,
    discovered: &'a Slot<DiscoveredDevice>,
    session: &'a Slot<Arc<dyn DeviceSession>>,
}

async fn connect(
    endpoint: Endpoint<'_>,
    transport: &dyn Transport,
    ui: &FlowUi,
    scopes: &Scopes,
) -> Result<(), StepError> {
    if endpoint.session.is_set() {
        debug!(role = endpoint.role, "Already connected");
        return Ok(());
    }
    let barcode = endpoint.barcode.require()?;

    let _spinner = ui.spinner();
    let address = match endpoint.discovered.get() {
        Some(found) if found.matches(&barcode) => found.address,
        _ => {
            let address = transport.discover(&barcode.serial_number).await?;
            scopes.ensure_active()?;
            endpoint.discovered.replace(DiscoveredDevice {
                serial_number: barcode.serial_number.clone(),
                address: address.clone(),
            });
            address
        }
    };

    let session = match transport.connect(&address, barcode.mobile_secret()).await {
        Ok(session) => session,
        Err(TransportError::PairingRejected { .. }) => {
            scopes.ensure_active()?;
            warn!(
                role = endpoint.role,
                serial = %barcode.serial_number,
                "Pairing rejected, asking for a new scan"
            );
            return Err(StepError::NeedsInput(endpoint.rescan));
        }
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = scopes.ensure_active() {
        // never committed, so nobody else will close it
        session.disconnect().await;
        return Err(e);
    }
    endpoint.session.set(session)?;

    info!(role = endpoint.role, address = %address, "Device connected");
    Ok(())
}

/// Finds the target device by its serial and pairs with it.
pub struct ConnectToTarget {
    transport: Arc<dyn Transport>,
    ui: FlowUi,
}

impl ConnectToTarget {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            transport: Arc::clone(&deps.transport),
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for ConnectToTarget {
    fn name(&self) -> &'static str {
        "connect_to_target"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        let target = &ctxs.target_device;
        let endpoint = Endpoint {
            role: "target",
            rescan: InputKind::TargetBarcode,
            barcode: &target.barcode,
            discovered: &target.discovered,
            session: &target.session,
        };
        connect(endpoint, self.transport.as_ref(), &self.ui, scopes).await
    }
}

/// Finds the commissioner by its serial and pairs with it.
pub struct ConnectToCommissioner {
    transport: Arc<dyn Transport>,
    ui: FlowUi,
}

impl ConnectToCommissioner {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            transport: Arc::clone(&deps.transport),
            ui: deps.ui.clone(),
        }
    }
}

#[async_trait]
impl SetupStep for ConnectToCommissioner {
    fn name(&self) -> &'static str {
        "connect_to_commissioner"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        let commissioner = &ctxs.commissioner;
        let endpoint = Endpoint {
            role: "commissioner",
            rescan: InputKind::CommissionerBarcode,
            barcode: &commissioner.barcode,
            discovered: &commissioner.discovered,
            session: &commissioner.session,
        };
        connect(endpoint, self.transport.as_ref(), &self.ui, scopes).await
    }
}
