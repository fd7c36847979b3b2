//! Execution scopes for one setup flow.
//!
//! A flow has two logical contexts:
//! - a **UI-affinity** context: a single task that runs submitted work one
//!   item at a time, in submission order
//! - a **background** context: the tokio worker pool, where steps and
//!   collaborator I/O run
//!
//! Both are bound to the flow's cancellation token. Panics in fire-and-forget
//! work are caught at the boundary and logged; panics in awaited work are
//! returned to the caller as [`ScopeError::WorkerPanicked`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ScopeError;
use crate::flow::StepError;

type UiWork = BoxFuture<'static, ()>;

/// Cloneable handle to a flow's execution contexts.
#[derive(Clone)]
pub struct Scopes {
    inner: Arc<ScopesInner>,
}

struct ScopesInner {
    session_id: Uuid,
    ui_tx: mpsc::UnboundedSender<UiWork>,
    token: CancellationToken,
}

impl Scopes {
    /// Create scopes for a flow and spawn its UI-affinity task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(session_id: Uuid, token: CancellationToken) -> Self {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ui_queue(session_id, ui_rx, token.clone()));
        Self {
            inner: Arc::new(ScopesInner {
                session_id,
                ui_tx,
                token,
            }),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Schedule `work` on the UI-affinity context. Never blocks.
    ///
    /// Work queued after the flow is cancelled is dropped without running.
    pub fn on_main<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.ui_tx.send(work.boxed()).is_err() {
            debug!(session_id = %self.inner.session_id, "UI queue closed; dropping work");
        }
    }

    /// Schedule `work` on the background context. Never blocks.
    pub fn on_worker<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(run_guarded(self.inner.session_id, "worker", work.boxed()));
    }

    /// Run `work` on the background context and wait for its result.
    ///
    /// The work is not preempted if the flow is cancelled meanwhile; it is
    /// up to the work itself to observe [`Scopes::is_cancelled`].
    pub async fn with_worker<F, T>(&self, work: F) -> Result<T, ScopeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::spawn(work).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => Err(ScopeError::WorkerPanicked(panic_message(
                e.into_panic().as_ref(),
            ))),
            Err(_) => Err(ScopeError::WorkerAborted),
        }
    }

    /// Whether the owning flow has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Signal cancellation of the owning flow.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Resolves once the owning flow is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Step-side cancellation check for use before and after suspend points.
    pub fn ensure_active(&self) -> Result<(), StepError> {
        if self.is_cancelled() {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `false` if the flow is
    /// cancelled first.
    pub async fn delay(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl std::fmt::Debug for Scopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scopes")
            .field("session_id", &self.inner.session_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

async fn run_ui_queue(
    session_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<UiWork>,
    token: CancellationToken,
) {
    loop {
        let work = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            work = rx.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };
        run_guarded(session_id, "main", work).await;
    }
    debug!(session_id = %session_id, "UI queue stopped");
}

async fn run_guarded(session_id: Uuid, context: &'static str, work: BoxFuture<'static, ()>) {
    if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
        error!(
            session_id = %session_id,
            context,
            "Scoped work panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
