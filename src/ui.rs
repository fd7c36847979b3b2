//! UI delegate contract.
//!
//! The engine never talks to screens. It only asks the hosting UI for generic
//! progress indication through [`FlowUiDelegate`], held weakly so that a
//! torn-down UI is not kept alive by an in-flight flow.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Progress hooks implemented by the hosting UI.
///
/// May be called from any thread, not only the UI-affinity context;
/// implementers marshal onto their rendering context themselves.
pub trait FlowUiDelegate: Send + Sync {
    /// Show or hide the blocking progress spinner. Last call wins.
    fn show_global_progress_spinner(&self, visible: bool);
}

/// Weak, detachable handle to the UI delegate.
#[derive(Clone, Default)]
pub struct FlowUi {
    delegate: Arc<RwLock<Option<Weak<dyn FlowUiDelegate>>>>,
}

impl FlowUi {
    pub fn new(delegate: &Arc<dyn FlowUiDelegate>) -> Self {
        let ui = Self::default();
        ui.attach(delegate);
        ui
    }

    /// A handle with no delegate; every call is a no-op.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&self, delegate: &Arc<dyn FlowUiDelegate>) {
        *self.delegate.write() = Some(Arc::downgrade(delegate));
    }

    /// Drop the delegate reference. Subsequent calls are no-ops.
    pub fn detach(&self) {
        *self.delegate.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.upgrade().is_some()
    }

    pub fn show_global_progress_spinner(&self, visible: bool) {
        if let Some(delegate) = self.upgrade() {
            delegate.show_global_progress_spinner(visible);
        }
    }

    /// Show the spinner until the returned guard is dropped.
    #[must_use = "the spinner is hidden as soon as the guard is dropped"]
    pub fn spinner(&self) -> SpinnerGuard {
        self.show_global_progress_spinner(true);
        SpinnerGuard { ui: self.clone() }
    }

    fn upgrade(&self) -> Option<Arc<dyn FlowUiDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for FlowUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowUi")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Hides the global spinner when dropped, on every exit path of the scope
/// that created it (early return, `?`, cancellation, unwinding).
#[derive(Debug)]
pub struct SpinnerGuard {
    ui: FlowUi,
}

impl Drop for SpinnerGuard {
    fn drop(&mut self) {
        self.ui.show_global_progress_spinner(false);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Delegate that records every spinner call.
    #[derive(Default)]
    pub struct RecordingUi {
        calls: Mutex<Vec<bool>>,
    }

    impl RecordingUi {
        pub fn calls(&self) -> Vec<bool> {
            self.calls.lock().clone()
        }

        pub fn shows(&self) -> usize {
            self.calls.lock().iter().filter(|v| **v).count()
        }

        pub fn hides(&self) -> usize {
            self.calls.lock().iter().filter(|v| !**v).count()
        }
    }

    impl FlowUiDelegate for RecordingUi {
        fn show_global_progress_spinner(&self, visible: bool) {
            self.calls.lock().push(visible);
        }
    }
}
