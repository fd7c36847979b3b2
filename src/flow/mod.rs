pub mod manager;
pub mod plan;
pub mod session;
pub mod state;
pub mod step;

pub use manager::FlowManager;
pub use plan::{FlowPlan, PlannedStep, StepCondition};
pub use session::FlowSessionSlot;
pub use state::{FlowEvent, FlowState, StateTransition};
pub use step::{InputKind, Recoverable, SetupStep, StepError, StepOutcome};
