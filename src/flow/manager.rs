//! Drives the step plan for one commissioning session.
//!
//! The manager owns the setup contexts, the scopes and the plan. `start()`
//! spawns a single driver on the background context that runs the steps
//! strictly one after another:
//!
//! - `Success` → next step
//! - `RecoverableFailure(Transient)` → back off and re-run, up to
//!   `max_step_attempts` consecutive failures, then abort
//! - `RecoverableFailure(NeedsInput)` → park until the matching entry point
//!   delivers input, then re-run
//! - `FatalFailure` or a panicking step → abort
//!
//! Cancellation is cooperative: an in-flight step is never preempted, but
//! once it returns nothing further is scheduled or broadcast.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{FlowConfig, millis};
use crate::contexts::model::normalize_device_name;
use crate::contexts::{BarcodeData, SetupContexts};
use crate::error::FlowError;
use crate::scopes::Scopes;
use crate::ui::FlowUi;

use super::plan::{FlowPlan, PlannedStep};
use super::state::{FlowEvent, FlowState, StateTransition};
use super::step::{InputKind, Recoverable, StepOutcome};

/// State shared between the manager handle and its driver task.
struct Shared {
    session_id: Uuid,
    state_tx: watch::Sender<FlowState>,
    events: broadcast::Sender<FlowEvent>,
    /// Input the driver is parked on. Set only for the duration of one wait
    /// and cleared by the entry point that satisfies it, so each wait is
    /// answered at most once.
    expecting: Mutex<Option<InputKind>>,
    input_ready: Notify,
    history: Mutex<VecDeque<StateTransition>>,
    history_limit: usize,
}

impl Shared {
    fn state(&self) -> FlowState {
        self.state_tx.borrow().clone()
    }

    fn transition(&self, next: FlowState) {
        let mut applied = None;
        self.state_tx.send_if_modified(|current| {
            if !current.can_transition_to(&next) {
                return false;
            }
            let previous = std::mem::replace(current, next.clone());
            applied = Some(previous);
            true
        });

        match applied {
            Some(from) => {
                debug!(session_id = %self.session_id, from = %from, to = %next, "Flow state changed");
                let mut history = self.history.lock();
                history.push_back(StateTransition {
                    from,
                    to: next,
                    timestamp: Utc::now(),
                });
                while history.len() > self.history_limit {
                    history.pop_front();
                }
            }
            None => {
                error!(
                    session_id = %self.session_id,
                    from = %self.state(),
                    to = %next,
                    "Rejected invalid flow state transition"
                );
            }
        }
    }

    fn emit(&self, event: FlowEvent) {
        // ok if nobody is listening
        let _ = self.events.send(event);
    }
}

/// Coordinates one commissioning session.
pub struct FlowManager {
    config: FlowConfig,
    plan: Arc<FlowPlan>,
    ctxs: Arc<SetupContexts>,
    scopes: Scopes,
    ui: FlowUi,
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl FlowManager {
    /// Create a flow bound to a fresh cancellation token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: FlowConfig, plan: FlowPlan, ui: FlowUi) -> Self {
        Self::with_token(config, plan, ui, CancellationToken::new())
    }

    /// Create a flow whose cancellation is tied to `token`, typically the
    /// hosting UI's lifetime token.
    pub fn with_token(
        config: FlowConfig,
        plan: FlowPlan,
        ui: FlowUi,
        token: CancellationToken,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let (state_tx, _state_rx) = watch::channel(FlowState::Idle);
        let (events, _events_rx) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(Shared {
            session_id,
            state_tx,
            events,
            expecting: Mutex::new(None),
            input_ready: Notify::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit: config.history_limit,
        });

        Self {
            scopes: Scopes::new(session_id, token),
            config,
            plan: Arc::new(plan),
            ctxs: SetupContexts::new(),
            ui,
            shared,
            started: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn contexts(&self) -> &Arc<SetupContexts> {
        &self.ctxs
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn plan(&self) -> &FlowPlan {
        &self.plan
    }

    /// Begin executing the plan from the first step.
    pub fn start(&self) -> Result<(), FlowError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyStarted {
                id: self.session_id(),
            });
        }

        info!(
            session_id = %self.session_id(),
            steps = self.plan.len(),
            "Starting setup flow"
        );

        let driver = Driver {
            config: self.config.clone(),
            plan: Arc::clone(&self.plan),
            ctxs: Arc::clone(&self.ctxs),
            scopes: self.scopes.clone(),
            shared: Arc::clone(&self.shared),
        };
        self.scopes.on_worker(driver.run());
        Ok(())
    }

    /// Cancel the flow. In-flight collaborator calls finish on their own;
    /// no further step is scheduled.
    pub fn cancel(&self) {
        if !self.scopes.is_cancelled() {
            info!(session_id = %self.session_id(), "Cancelling setup flow");
        }
        self.scopes.cancel();
        if !self.started.load(Ordering::SeqCst) && !self.state().is_terminal() {
            self.shared.transition(FlowState::Cancelled);
        }
    }

    /// Forget the UI delegate, e.g. when the hosting screen is torn down.
    pub fn detach_ui(&self) {
        self.ui.detach();
    }

    pub fn state(&self) -> FlowState {
        self.shared.state()
    }

    /// Watch the flow state.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.shared.state_tx.subscribe()
    }

    /// Flow state as a stream, starting with the current value.
    pub fn state_stream(&self) -> WatchStream<FlowState> {
        WatchStream::new(self.subscribe())
    }

    /// Subscribe to step-level events.
    pub fn events(&self) -> broadcast::Receiver<FlowEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the flow reaches a terminal state.
    pub async fn wait_for_terminal(&self) -> FlowState {
        let mut rx = self.subscribe();
        match rx.wait_for(FlowState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Recorded state transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.history.lock().iter().cloned().collect()
    }

    // ── User input entry points ─────────────────────────────────────────

    /// Record the scanned barcode of the device being set up.
    pub fn update_target_device_barcode(&self, raw: &str) -> Result<(), FlowError> {
        self.accept_input(InputKind::TargetBarcode, |ctxs| {
            let barcode = BarcodeData::parse(raw)?;
            ctxs.target_device.barcode.replace(barcode);
            Ok(())
        })
    }

    /// Record the scanned barcode of the commissioner device.
    pub fn update_commissioner_barcode(&self, raw: &str) -> Result<(), FlowError> {
        self.accept_input(InputKind::CommissionerBarcode, |ctxs| {
            let barcode = BarcodeData::parse(raw)?;
            if let Some(target) = ctxs.target_device.barcode.get()
                && target.same_device(&barcode)
            {
                return Err("commissioner must be a different device than the target".to_string());
            }
            ctxs.commissioner.barcode.replace(barcode);
            Ok(())
        })
    }

    /// Record the name the user chose for the device.
    pub fn update_target_device_name_to_assign(&self, name: &str) -> Result<(), FlowError> {
        self.accept_input(InputKind::DeviceName, |ctxs| {
            let name = normalize_device_name(name)?;
            ctxs.target_device.name_to_assign.replace(name);
            Ok(())
        })
    }

    fn accept_input<F>(&self, input: InputKind, write: F) -> Result<(), FlowError>
    where
        F: FnOnce(&SetupContexts) -> Result<(), String>,
    {
        let mut expecting = self.shared.expecting.lock();
        if *expecting != Some(input) || self.state().is_terminal() {
            warn!(
                session_id = %self.session_id(),
                input = %input,
                expecting = ?*expecting,
                "Ignoring input no step is waiting for"
            );
            return Err(FlowError::UnexpectedInput {
                id: self.session_id(),
                input,
            });
        }

        write(&self.ctxs).map_err(|reason| {
            debug!(session_id = %self.session_id(), input = %input, reason = %reason, "Rejected input");
            FlowError::InvalidInput { input, reason }
        })?;
        *expecting = None;
        drop(expecting);

        info!(session_id = %self.session_id(), input = %input, "Input accepted");
        self.shared.emit(FlowEvent::InputAccepted { input });
        self.shared.input_ready.notify_one();
        Ok(())
    }
}

impl Drop for FlowManager {
    fn drop(&mut self) {
        self.scopes.cancel();
    }
}

impl std::fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowManager")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .field("plan", &self.plan)
            .finish()
    }
}

/// How the driver leaves a step.
enum Resolution {
    Advance,
    Stop,
}

/// Background task that walks the plan.
struct Driver {
    config: FlowConfig,
    plan: Arc<FlowPlan>,
    ctxs: Arc<SetupContexts>,
    scopes: Scopes,
    shared: Arc<Shared>,
}

impl Driver {
    async fn run(self) {
        let mut index = 0;
        while let Some(planned) = self.plan.get(index) {
            if self.scopes.is_cancelled() {
                self.finish_cancelled();
                return;
            }

            if !planned.should_run(&self.ctxs) {
                debug!(session_id = %self.shared.session_id, step = planned.name(), index, "Skipping step");
                self.shared.emit(FlowEvent::StepSkipped {
                    index,
                    step: planned.name().to_string(),
                });
                index += 1;
                continue;
            }

            match self.run_to_resolution(index, planned).await {
                Resolution::Advance => index += 1,
                Resolution::Stop => return,
            }
        }

        if self.scopes.is_cancelled() {
            self.finish_cancelled();
            return;
        }
        info!(session_id = %self.shared.session_id, "Setup flow completed");
        self.finish(FlowState::Completed);
    }

    async fn run_to_resolution(&self, index: usize, planned: &PlannedStep) -> Resolution {
        let name = planned.name();
        let mut attempt = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            attempt += 1;
            self.shared.transition(FlowState::Running {
                step: name.to_string(),
                index,
                attempt,
            });
            self.shared.emit(FlowEvent::StepStarted {
                index,
                step: name.to_string(),
                attempt,
            });

            let result = {
                let step = Arc::clone(planned.step());
                let ctxs = Arc::clone(&self.ctxs);
                let scopes = self.scopes.clone();
                self.scopes
                    .with_worker(async move { step.run(&ctxs, &scopes).await })
                    .await
            };

            if self.scopes.is_cancelled() {
                debug!(session_id = %self.shared.session_id, step = name, "Step returned after cancellation");
                self.finish_cancelled();
                return Resolution::Stop;
            }

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(session_id = %self.shared.session_id, step = name, error = %e, "Step crashed");
                    self.abort(format!("{name} crashed: {e}"));
                    return Resolution::Stop;
                }
            };

            self.shared.emit(FlowEvent::StepFinished {
                index,
                step: name.to_string(),
                outcome: outcome.clone(),
            });

            match outcome {
                StepOutcome::Success => {
                    info!(session_id = %self.shared.session_id, step = name, attempt, "Step succeeded");
                    return Resolution::Advance;
                }
                StepOutcome::RecoverableFailure(Recoverable::Transient(reason)) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_step_attempts {
                        warn!(
                            session_id = %self.shared.session_id,
                            step = name,
                            attempts = consecutive_failures,
                            reason = %reason,
                            "Step retries exhausted"
                        );
                        self.abort(format!(
                            "{name} failed {consecutive_failures} times: {reason}"
                        ));
                        return Resolution::Stop;
                    }

                    warn!(
                        session_id = %self.shared.session_id,
                        step = name,
                        attempt,
                        reason = %reason,
                        "Step failed, retrying"
                    );
                    self.shared.emit(FlowEvent::RetryScheduled {
                        index,
                        step: name.to_string(),
                        attempt: attempt + 1,
                        delay_ms: millis(self.config.retry_backoff),
                    });
                    if !self.scopes.delay(self.config.retry_backoff).await {
                        self.finish_cancelled();
                        return Resolution::Stop;
                    }
                }
                StepOutcome::RecoverableFailure(Recoverable::NeedsInput(input)) => {
                    {
                        // entry points see the prompt and the open wait together
                        let mut expecting = self.shared.expecting.lock();
                        *expecting = Some(input);
                        self.shared.transition(FlowState::AwaitingInput {
                            step: name.to_string(),
                            input,
                        });
                        self.shared.emit(FlowEvent::AwaitingInput {
                            step: name.to_string(),
                            input,
                        });
                    }
                    debug!(session_id = %self.shared.session_id, step = name, input = %input, "Waiting for input");

                    if !self.wait_for_input().await {
                        self.finish_cancelled();
                        return Resolution::Stop;
                    }
                }
                StepOutcome::FatalFailure(reason) => {
                    error!(session_id = %self.shared.session_id, step = name, reason = %reason, "Step failed fatally");
                    self.abort(format!("{name}: {reason}"));
                    return Resolution::Stop;
                }
                StepOutcome::Cancelled => {
                    self.finish_cancelled();
                    return Resolution::Stop;
                }
            }
        }
    }

    /// Park until an entry point delivers input. `false` if cancelled first.
    async fn wait_for_input(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.scopes.cancelled() => false,
            _ = self.shared.input_ready.notified() => true,
        }
    }

    fn abort(&self, reason: String) {
        self.finish(FlowState::Aborted { reason });
    }

    fn finish(&self, state: FlowState) {
        *self.shared.expecting.lock() = None;
        self.shared.transition(state.clone());
        self.shared.emit(FlowEvent::Finished { state });
        self.release_sessions();
    }

    /// Terminal bookkeeping only: no events, no UI calls.
    fn finish_cancelled(&self) {
        *self.shared.expecting.lock() = None;
        if !self.shared.state().is_terminal() {
            info!(session_id = %self.shared.session_id, "Setup flow cancelled");
            self.shared.transition(FlowState::Cancelled);
        }
        self.release_sessions();
    }

    fn release_sessions(&self) {
        let sessions: Vec<_> = [
            self.ctxs.target_device.session.get(),
            self.ctxs.commissioner.session.get(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if sessions.is_empty() {
            return;
        }

        let session_id = self.shared.session_id;
        tokio::spawn(async move {
            for session in sessions {
                session.disconnect().await;
            }
            debug!(session_id = %session_id, "Device sessions released");
        });
    }
}
