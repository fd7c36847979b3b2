use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_stream::StreamExt;

use mesh_setup::collaborators::simulated::{SimulatedCloud, SimulatedDevice, SimulatedTransport};
use mesh_setup::config::FlowConfig;
use mesh_setup::contexts::{MeshNetworkInfo, SimRecord, SimStatus};
use mesh_setup::flow::{FlowEvent, FlowManager, FlowSessionSlot, FlowState, InputKind};
use mesh_setup::steps::{StepDeps, standard_plan};
use mesh_setup::ui::{FlowUi, FlowUiDelegate};

/// Prints spinner changes to stderr.
struct ConsoleUi;

impl FlowUiDelegate for ConsoleUi {
    fn show_global_progress_spinner(&self, visible: bool) {
        if visible {
            eprintln!("   ⏳ working...");
        }
    }
}

fn fleet() -> (Vec<SimulatedDevice>, SimRecord) {
    let iccid = "89014103271226617540";
    let network = MeshNetworkInfo {
        name: "workshop".to_string(),
        ext_pan_id: "4f1c0a7e3b2d9e10".to_string(),
        network_id: Some("5c6d0a1b2c3d4e5f6a7b8c9d".to_string()),
    };
    let devices = vec![
        SimulatedDevice::new("ARGHAB812FFFFFF", "ARGONMOBILESEC1", "e00fce681a2b3c4d5e6f7a8b", 12),
        SimulatedDevice::new("B40KAB812FFFFFF", "BORONMOBILESEC1", "e00fce682b3c4d5e6f7a8b9c", 13)
            .with_iccid(iccid),
        SimulatedDevice::new("XENKAB812FFFFFF", "XENONMOBILESEC1", "e00fce683c4d5e6f7a8b9c0d", 14),
        SimulatedDevice::new("ARGHAB812EEEEEE", "ARGONMOBILESEC2", "e00fce684d5e6f7a8b9c0d1e", 12)
            .with_network(network),
    ];
    let sim = SimRecord {
        iccid: iccid.to_string(),
        status: SimStatus::Active,
        carrier: Some("Twilio".to_string()),
        data_limit_mb: Some(5),
    };
    (devices, sim)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = FlowConfig::from_env().context("reading flow configuration")?;

    let (devices, sim) = fleet();
    let family = std::env::args().nth(1).unwrap_or_else(|| "xenon".to_string());
    let target = match family.as_str() {
        "argon" => devices[0].clone(),
        "boron" => devices[1].clone(),
        "xenon" => devices[2].clone(),
        other => bail!("unknown device family {other:?}, expected argon, boron or xenon"),
    };
    let commissioner = devices[3].clone();
    let device_name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("my {family}"));

    eprintln!("📡 Mesh Setup v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Target: {} ({family})", target.serial);
    eprintln!("   Max attempts per step: {}", config.max_step_attempts);

    let delegate: Arc<dyn FlowUiDelegate> = Arc::new(ConsoleUi);
    let ui = FlowUi::new(&delegate);
    let deps = StepDeps {
        cloud: Arc::new(
            SimulatedCloud::new()
                .with_sim(sim)
                .with_latency(Duration::from_millis(150))
                .with_sim_timeouts(1),
        ),
        transport: Arc::new(
            SimulatedTransport::new(devices)
                .with_latency(Duration::from_millis(100))
                .with_discover_misses(1),
        ),
        ui: ui.clone(),
    };

    let slot = FlowSessionSlot::new();
    let manager = Arc::new(FlowManager::new(config, standard_plan(&deps), ui));
    slot.attach(Arc::clone(&manager));

    let mut events = manager.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                FlowEvent::StepStarted { step, attempt, .. } if attempt > 1 => {
                    eprintln!("→ {step} (attempt {attempt})")
                }
                FlowEvent::StepStarted { step, .. } => eprintln!("→ {step}"),
                FlowEvent::StepSkipped { step, .. } => eprintln!("  skipped {step}"),
                FlowEvent::RetryScheduled { step, delay_ms, .. } => {
                    eprintln!("  {step} will retry in {delay_ms}ms")
                }
                FlowEvent::Finished { state } => eprintln!("■ {state}"),
                _ => {}
            }
        }
    });

    manager.start()?;

    // Play the user: answer every prompt the flow raises.
    let mut states = manager.state_stream();
    while let Some(state) = states.next().await {
        match state {
            FlowState::AwaitingInput { input, .. } => {
                let reply = match input {
                    InputKind::TargetBarcode => slot.update_target_device_barcode(&target.barcode()),
                    InputKind::CommissionerBarcode => {
                        slot.update_commissioner_barcode(&commissioner.barcode())
                    }
                    InputKind::DeviceName => slot.update_target_device_name_to_assign(&device_name),
                };
                if let Err(e) = reply {
                    eprintln!("  input rejected: {e}");
                    slot.cancel()?;
                }
            }
            state if state.is_terminal() => break,
            _ => {}
        }
    }

    let outcome = manager.wait_for_terminal().await;
    let summary = serde_json::to_string_pretty(&manager.contexts().summary())?;
    println!("{summary}");
    slot.detach();

    match outcome {
        FlowState::Completed => Ok(()),
        other => bail!("setup did not complete: {other}"),
    }
}
