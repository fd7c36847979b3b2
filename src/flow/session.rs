//! Slot through which UI code reaches the active flow.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::FlowError;

use super::manager::FlowManager;

/// Holds at most one active [`FlowManager`].
///
/// Entry points called while nothing is attached fail with
/// [`FlowError::NoActiveFlow`] instead of being dropped silently.
#[derive(Debug, Default)]
pub struct FlowSessionSlot {
    current: RwLock<Option<Arc<FlowManager>>>,
}

impl FlowSessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `manager` the active flow, returning the one it replaces.
    /// A replaced flow is cancelled.
    pub fn attach(&self, manager: Arc<FlowManager>) -> Option<Arc<FlowManager>> {
        debug!(session_id = %manager.session_id(), "Attaching setup flow");
        let previous = self.current.write().replace(manager);
        if let Some(previous) = &previous {
            previous.cancel();
        }
        previous
    }

    /// Detach and cancel the active flow, if any.
    pub fn detach(&self) -> Option<Arc<FlowManager>> {
        let previous = self.current.write().take();
        if let Some(previous) = &previous {
            debug!(session_id = %previous.session_id(), "Detaching setup flow");
            previous.detach_ui();
            previous.cancel();
        }
        previous
    }

    pub fn current(&self) -> Result<Arc<FlowManager>, FlowError> {
        self.current.read().clone().ok_or_else(|| {
            warn!("No active setup flow");
            FlowError::NoActiveFlow
        })
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn update_target_device_barcode(&self, raw: &str) -> Result<(), FlowError> {
        self.current()?.update_target_device_barcode(raw)
    }

    pub fn update_commissioner_barcode(&self, raw: &str) -> Result<(), FlowError> {
        self.current()?.update_commissioner_barcode(raw)
    }

    pub fn update_target_device_name_to_assign(&self, name: &str) -> Result<(), FlowError> {
        self.current()?.update_target_device_name_to_assign(name)
    }

    pub fn cancel(&self) -> Result<(), FlowError> {
        self.current()?.cancel();
        Ok(())
    }
}
