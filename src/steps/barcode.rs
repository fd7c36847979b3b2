use async_trait::async_trait;
use tracing::debug;

use crate::contexts::SetupContexts;
use crate::flow::{InputKind, SetupStep, StepError};
use crate::scopes::Scopes;

/// Waits until the target device's sticker has been scanned.
pub struct GetTargetBarcode;

#[async_trait]
impl SetupStep for GetTargetBarcode {
    fn name(&self) -> &'static str {
        "get_target_barcode"
    }

    async fn run_step(&self, ctxs: &SetupContexts, _scopes: &Scopes) -> Result<(), StepError> {
        match ctxs.target_device.barcode.get() {
            Some(barcode) => {
                debug!(serial = %barcode.serial_number, "Target barcode present");
                Ok(())
            }
            None => Err(StepError::NeedsInput(InputKind::TargetBarcode)),
        }
    }
}

/// Waits until the commissioner's sticker has been scanned.
pub struct GetCommissionerBarcode;

#[async_trait]
impl SetupStep for GetCommissionerBarcode {
    fn name(&self) -> &'static str {
        "get_commissioner_barcode"
    }

    async fn run_step(&self, ctxs: &SetupContexts, _scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.commissioner.barcode.is_set() {
            Ok(())
        } else {
            Err(StepError::NeedsInput(InputKind::CommissionerBarcode))
        }
    }
}
