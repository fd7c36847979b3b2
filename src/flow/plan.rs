//! Ordered step plan with per-step run conditions.

use std::sync::Arc;

use crate::contexts::SetupContexts;

use super::step::SetupStep;

/// Predicate deciding whether a planned step runs, evaluated against the
/// contexts as they stand when the flow reaches the step.
pub type StepCondition = Arc<dyn Fn(&SetupContexts) -> bool + Send + Sync>;

/// A step plus its optional run condition.
#[derive(Clone)]
pub struct PlannedStep {
    step: Arc<dyn SetupStep>,
    when: Option<StepCondition>,
}

impl PlannedStep {
    pub fn step(&self) -> &Arc<dyn SetupStep> {
        &self.step
    }

    pub fn name(&self) -> &'static str {
        self.step.name()
    }

    pub fn should_run(&self, ctxs: &SetupContexts) -> bool {
        self.when.as_ref().is_none_or(|when| when(ctxs))
    }
}

/// The linear commissioning sequence.
#[derive(Clone, Default)]
pub struct FlowPlan {
    steps: Vec<PlannedStep>,
}

impl FlowPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step that always runs.
    pub fn then(mut self, step: impl SetupStep + 'static) -> Self {
        self.steps.push(PlannedStep {
            step: Arc::new(step),
            when: None,
        });
        self
    }

    /// Append a step that runs only when `when` holds.
    pub fn then_when<F>(mut self, step: impl SetupStep + 'static, when: F) -> Self
    where
        F: Fn(&SetupContexts) -> bool + Send + Sync + 'static,
    {
        self.steps.push(PlannedStep {
            step: Arc::new(step),
            when: Some(Arc::new(when)),
        });
        self
    }

    pub fn get(&self, index: usize) -> Option<&PlannedStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(PlannedStep::name).collect()
    }
}

impl std::fmt::Debug for FlowPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowPlan")
            .field("steps", &self.names())
            .finish()
    }
}
