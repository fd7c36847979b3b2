//! End-to-end tests for the standard commissioning plan.
//!
//! Each test wires the plan to in-memory devices and a cloud, plays the
//! user by answering input prompts, and checks the resulting contexts,
//! events and spinner calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;

use mesh_setup::collaborators::CloudApi;
use mesh_setup::collaborators::simulated::{SimulatedCloud, SimulatedDevice, SimulatedTransport};
use mesh_setup::config::FlowConfig;
use mesh_setup::contexts::{ClaimCode, DeviceType, MeshNetworkInfo, SimRecord, SimStatus};
use mesh_setup::error::{CloudError, FlowError};
use mesh_setup::flow::{FlowEvent, FlowManager, FlowSessionSlot, FlowState, InputKind};
use mesh_setup::steps::{StepDeps, standard_plan};
use mesh_setup::ui::{FlowUi, FlowUiDelegate};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ICCID: &str = "89014103271226617540";

/// Delegate that records every spinner call.
#[derive(Default)]
struct RecordingUi {
    calls: Mutex<Vec<bool>>,
}

impl RecordingUi {
    fn shows(&self) -> usize {
        self.calls.lock().iter().filter(|v| **v).count()
    }

    fn hides(&self) -> usize {
        self.calls.lock().iter().filter(|v| !**v).count()
    }
}

impl FlowUiDelegate for RecordingUi {
    fn show_global_progress_spinner(&self, visible: bool) {
        self.calls.lock().push(visible);
    }
}

/// Cloud whose SIM lookup blocks until released.
struct GatedCloud {
    inner: SimulatedCloud,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl CloudApi for GatedCloud {
    async fn get_sim(&self, iccid: &str) -> Result<SimRecord, CloudError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.get_sim(iccid).await
    }

    async fn create_claim_code(&self) -> Result<ClaimCode, CloudError> {
        self.inner.create_claim_code().await
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), CloudError> {
        self.inner.rename_device(device_id, name).await
    }
}

fn argon() -> SimulatedDevice {
    SimulatedDevice::new("ARGHAB812FFFFFF", "ARGONMOBILESEC1", "e00fce681a2b3c4d5e6f7a8b", 12)
}

fn boron() -> SimulatedDevice {
    SimulatedDevice::new("B40KAB812FFFFFF", "BORONMOBILESEC1", "e00fce682b3c4d5e6f7a8b9c", 13)
        .with_iccid(ICCID)
}

fn xenon() -> SimulatedDevice {
    SimulatedDevice::new("XENKAB812FFFFFF", "XENONMOBILESEC1", "e00fce683c4d5e6f7a8b9c0d", 14)
}

fn workshop() -> MeshNetworkInfo {
    MeshNetworkInfo {
        name: "workshop".to_string(),
        ext_pan_id: "4f1c0a7e3b2d9e10".to_string(),
        network_id: None,
    }
}

fn commissioner() -> SimulatedDevice {
    SimulatedDevice::new("ARGHAB812EEEEEE", "ARGONMOBILESEC2", "e00fce684d5e6f7a8b9c0d1e", 12)
        .with_network(workshop())
}

fn sim() -> SimRecord {
    SimRecord {
        iccid: ICCID.to_string(),
        status: SimStatus::Active,
        carrier: None,
        data_limit_mb: Some(5),
    }
}

fn fast_config() -> FlowConfig {
    FlowConfig {
        retry_backoff: Duration::from_millis(1),
        ..FlowConfig::default()
    }
}

struct Harness {
    manager: Arc<FlowManager>,
    transport: Arc<SimulatedTransport>,
    recorder: Arc<RecordingUi>,
    _delegate: Arc<dyn FlowUiDelegate>,
}

fn harness_with(cloud: Arc<dyn CloudApi>, transport: SimulatedTransport) -> Harness {
    let transport = Arc::new(transport);
    let recorder = Arc::new(RecordingUi::default());
    let delegate: Arc<dyn FlowUiDelegate> = recorder.clone();
    let ui = FlowUi::new(&delegate);
    let deps = StepDeps {
        cloud,
        transport: transport.clone(),
        ui: ui.clone(),
    };
    let manager = Arc::new(FlowManager::new(fast_config(), standard_plan(&deps), ui));
    Harness {
        manager,
        transport,
        recorder,
        _delegate: delegate,
    }
}

fn fleet() -> Vec<SimulatedDevice> {
    vec![argon(), boron(), xenon(), commissioner()]
}

/// Wait until the flow asks for `input`.
async fn asked_for(manager: &FlowManager, input: InputKind) {
    let mut rx = manager.subscribe();
    timeout(
        TEST_TIMEOUT,
        rx.wait_for(|s| matches!(s, FlowState::AwaitingInput { input: i, .. } if *i == input)),
    )
    .await
    .expect("timed out waiting for input prompt")
    .expect("state channel closed");
}

async fn terminal(manager: &FlowManager) -> FlowState {
    timeout(TEST_TIMEOUT, manager.wait_for_terminal())
        .await
        .expect("flow did not finish")
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn started_steps(events: &[FlowEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            FlowEvent::StepStarted { step, .. } => Some(step.clone()),
            _ => None,
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn argon_setup_completes() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&argon().barcode())
        .unwrap();
    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager
        .update_target_device_name_to_assign("Living Room")
        .unwrap();

    assert_eq!(terminal(&h.manager).await, FlowState::Completed);

    let summary = h.manager.contexts().summary();
    assert_eq!(summary.device_type, Some(DeviceType::Argon));
    assert_eq!(summary.assigned_name.as_deref(), Some("Living_Room"));
    assert!(summary.claim_code_sent);
    assert!(summary.sim.is_none());
    assert_eq!(
        h.transport.claim_code_for("e00fce681a2b3c4d5e6f7a8b"),
        Some(ClaimCode("claim-0000".to_string()))
    );

    let events = drain(&mut events);
    let started = started_steps(&events);
    assert!(!started.contains(&"fetch_full_sim_data".to_string()));
    assert!(!started.contains(&"connect_to_commissioner".to_string()));
    assert_eq!(
        events.last(),
        Some(&FlowEvent::Finished {
            state: FlowState::Completed
        })
    );
    assert_eq!(h.recorder.shows(), h.recorder.hides());
}

#[tokio::test]
async fn boron_fetches_sim_after_transient_failure() {
    let cloud = Arc::new(SimulatedCloud::new().with_sim(sim()).with_sim_timeouts(2));
    let h = harness_with(cloud.clone(), SimulatedTransport::new(fleet()));
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&boron().barcode())
        .unwrap();
    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("tracker").unwrap();

    assert_eq!(terminal(&h.manager).await, FlowState::Completed);
    assert_eq!(cloud.sim_request_count(), 3);
    assert_eq!(h.manager.contexts().target_device.sim.get(), Some(sim()));
    assert_eq!(
        h.manager.contexts().target_device.iccid.get().as_deref(),
        Some(ICCID)
    );
    assert_eq!(h.recorder.shows(), h.recorder.hides());
}

#[tokio::test]
async fn retry_cap_aborts_the_flow() {
    let cloud = Arc::new(SimulatedCloud::new().with_sim(sim()).with_sim_timeouts(u32::MAX));
    let h = harness_with(cloud.clone(), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&boron().barcode())
        .unwrap();

    match terminal(&h.manager).await {
        FlowState::Aborted { reason } => {
            assert!(reason.starts_with("fetch_full_sim_data failed 3 times"), "{reason}")
        }
        other => panic!("expected abort, got {other}"),
    }
    assert_eq!(cloud.sim_request_count(), 3);

    let started = started_steps(&drain(&mut events));
    assert!(!started.contains(&"fetch_claim_code".to_string()));
    assert_eq!(h.recorder.shows(), h.recorder.hides());
}

#[tokio::test]
async fn xenon_is_commissioned_onto_existing_mesh() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&xenon().barcode())
        .unwrap();

    asked_for(&h.manager, InputKind::CommissionerBarcode).await;
    // the target cannot commission itself
    let err = h
        .manager
        .update_commissioner_barcode(&xenon().barcode())
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::InvalidInput {
            input: InputKind::CommissionerBarcode,
            ..
        }
    ));
    h.manager
        .update_commissioner_barcode(&commissioner().barcode())
        .unwrap();

    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("node-7").unwrap();

    assert_eq!(terminal(&h.manager).await, FlowState::Completed);
    let ctxs = h.manager.contexts();
    assert_eq!(ctxs.network.target_network.get(), Some(workshop()));
    assert!(ctxs.commissioner.session.is_set());
    assert_eq!(h.transport.connect_count(), 2);
}

#[tokio::test]
async fn rejected_commissioner_is_scanned_again() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&xenon().barcode())
        .unwrap();

    asked_for(&h.manager, InputKind::CommissionerBarcode).await;
    let stale = SimulatedDevice {
        mobile_secret: "STALESECRET0001".to_string(),
        ..commissioner()
    };
    h.manager
        .update_commissioner_barcode(&stale.barcode())
        .unwrap();

    let mut state = h.manager.subscribe();
    timeout(
        TEST_TIMEOUT,
        state.wait_for(|s| {
            matches!(
                s,
                FlowState::AwaitingInput { step, input: InputKind::CommissionerBarcode }
                    if step == "connect_to_commissioner"
            )
        }),
    )
    .await
    .expect("no re-scan prompt")
    .expect("state channel closed");
    assert!(!h.manager.contexts().commissioner.session.is_set());
    h.manager
        .update_commissioner_barcode(&commissioner().barcode())
        .unwrap();

    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("node-8").unwrap();
    assert_eq!(terminal(&h.manager).await, FlowState::Completed);

    assert_eq!(
        h.manager.contexts().network.target_network.get(),
        Some(workshop())
    );
    // target once, commissioner twice
    assert_eq!(h.transport.connect_count(), 3);
    let prompts = drain(&mut events)
        .iter()
        .filter(|e| {
            matches!(
                e,
                FlowEvent::AwaitingInput {
                    input: InputKind::CommissionerBarcode,
                    ..
                }
            )
        })
        .count();
    assert_eq!(prompts, 2);
    assert_eq!(h.recorder.shows(), h.recorder.hides());
}

#[tokio::test]
async fn naming_input_advances_without_reprompt() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&argon().barcode())
        .unwrap();
    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("Bob").unwrap();

    assert_eq!(terminal(&h.manager).await, FlowState::Completed);
    assert_eq!(
        h.manager
            .contexts()
            .target_device
            .name_to_assign
            .get()
            .as_deref(),
        Some("Bob")
    );

    let name_prompts = drain(&mut events)
        .iter()
        .filter(|e| {
            matches!(
                e,
                FlowEvent::AwaitingInput {
                    input: InputKind::DeviceName,
                    ..
                }
            )
        })
        .count();
    assert_eq!(name_prompts, 1);
}

#[tokio::test]
async fn repeated_barcode_does_not_skip_the_name_prompt() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&argon().barcode())
        .unwrap();
    let err = h
        .manager
        .update_target_device_barcode(&argon().barcode())
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::UnexpectedInput {
            input: InputKind::TargetBarcode,
            ..
        }
    ));

    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("Bob").unwrap();
    assert_eq!(terminal(&h.manager).await, FlowState::Completed);

    let events = drain(&mut events);
    let name_prompts = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                FlowEvent::AwaitingInput {
                    input: InputKind::DeviceName,
                    ..
                }
            )
        })
        .count();
    assert_eq!(name_prompts, 1);
    let naming_runs = started_steps(&events)
        .iter()
        .filter(|s| *s == "get_new_device_name")
        .count();
    assert_eq!(naming_runs, 2);
}

#[tokio::test]
async fn steps_never_overlap() {
    let h = harness_with(
        Arc::new(SimulatedCloud::new().with_sim(sim()).with_sim_timeouts(1)),
        SimulatedTransport::new(fleet()).with_discover_misses(1),
    );
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&boron().barcode())
        .unwrap();
    asked_for(&h.manager, InputKind::DeviceName).await;
    h.manager.update_target_device_name_to_assign("b1").unwrap();
    assert_eq!(terminal(&h.manager).await, FlowState::Completed);

    let mut open: Option<usize> = None;
    let mut last_index = 0;
    for event in drain(&mut events) {
        match event {
            FlowEvent::StepStarted { index, .. } => {
                assert!(open.is_none(), "step {index} started while {open:?} running");
                assert!(index >= last_index, "plan went backwards");
                open = Some(index);
                last_index = index;
            }
            FlowEvent::StepFinished { index, .. } => {
                assert_eq!(open, Some(index));
                open = None;
            }
            _ => {}
        }
    }
    assert!(open.is_none());
}

#[tokio::test]
async fn cancel_during_cloud_call_commits_nothing() {
    let cloud = Arc::new(GatedCloud {
        inner: SimulatedCloud::new().with_sim(sim()),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let h = harness_with(cloud.clone(), SimulatedTransport::new(fleet()));
    let mut events = h.manager.events();
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    h.manager
        .update_target_device_barcode(&boron().barcode())
        .unwrap();

    timeout(TEST_TIMEOUT, cloud.entered.notified())
        .await
        .expect("SIM lookup never started");
    h.manager.cancel();
    cloud.release.notify_one();

    assert_eq!(terminal(&h.manager).await, FlowState::Cancelled);
    assert!(!h.manager.contexts().target_device.sim.is_set());

    let events = drain(&mut events);
    assert_eq!(
        started_steps(&events).last().map(String::as_str),
        Some("fetch_full_sim_data")
    );
    assert!(!events.iter().any(|e| matches!(e, FlowEvent::Finished { .. })));
    assert_eq!(h.recorder.shows(), h.recorder.hides());
}

#[tokio::test]
async fn unexpected_input_is_rejected() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    h.manager.start().unwrap();
    asked_for(&h.manager, InputKind::TargetBarcode).await;

    let err = h
        .manager
        .update_target_device_name_to_assign("early")
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::UnexpectedInput {
            input: InputKind::DeviceName,
            ..
        }
    ));
    assert!(!h.manager.contexts().target_device.name_to_assign.is_set());
    assert!(matches!(h.manager.state(), FlowState::AwaitingInput { .. }));

    let err = h
        .manager
        .update_target_device_barcode("not a barcode at all")
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidInput { .. }));
    assert!(!h.manager.contexts().target_device.barcode.is_set());
}

#[tokio::test]
async fn session_slot_routes_entry_points() {
    let slot = FlowSessionSlot::new();
    assert!(matches!(
        slot.update_target_device_barcode(&argon().barcode()),
        Err(FlowError::NoActiveFlow)
    ));

    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    slot.attach(Arc::clone(&h.manager));
    h.manager.start().unwrap();

    asked_for(&h.manager, InputKind::TargetBarcode).await;
    slot.update_target_device_barcode(&argon().barcode()).unwrap();
    asked_for(&h.manager, InputKind::DeviceName).await;
    slot.update_target_device_name_to_assign("via-slot").unwrap();
    assert_eq!(terminal(&h.manager).await, FlowState::Completed);

    slot.detach();
    assert!(matches!(
        slot.update_target_device_name_to_assign("late"),
        Err(FlowError::NoActiveFlow)
    ));
}

#[tokio::test]
async fn dropping_the_manager_cancels_the_flow() {
    let h = harness_with(Arc::new(SimulatedCloud::new()), SimulatedTransport::new(fleet()));
    h.manager.start().unwrap();
    asked_for(&h.manager, InputKind::TargetBarcode).await;

    let mut state = h.manager.subscribe();
    drop(h);

    let cancelled = timeout(TEST_TIMEOUT, state.wait_for(|s| *s == FlowState::Cancelled))
        .await
        .expect("flow was not cancelled");
    assert!(cancelled.is_ok());
}
