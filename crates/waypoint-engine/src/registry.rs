use std::collections::HashMap;
use std::sync::Arc;

use waypoint_core::config::{ActionSpec, StateSpec};
use waypoint_core::error::{Result, WaypointError};

use crate::action::{self, ActionRef};
use crate::state::{ActionState, ConditionalState, FinalState, StateRef};

pub type ActionFactory = Arc<dyn Fn(&ActionSpec, &Registry) -> Result<ActionRef> + Send + Sync>;
pub type StateFactory = Arc<dyn Fn(&StateSpec, &Registry) -> Result<StateRef> + Send + Sync>;

/// String-keyed factories for action and state kinds.
///
/// Config-built workflows resolve every `type`/`kind` through a registry.
/// Callers extend it by registering their own factories before building.
#[derive(Clone, Default)]
pub struct Registry {
    actions: HashMap<String, ActionFactory>,
    states: HashMap<String, StateFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action kind. Replaces any existing factory for `kind`.
    pub fn register_action<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ActionSpec, &Registry) -> Result<ActionRef> + Send + Sync + 'static,
    {
        self.actions.insert(kind.into(), Arc::new(factory));
    }

    /// Register a state kind. Replaces any existing factory for `kind`.
    pub fn register_state<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&StateSpec, &Registry) -> Result<StateRef> + Send + Sync + 'static,
    {
        self.states.insert(kind.into(), Arc::new(factory));
    }

    pub fn has_action(&self, kind: &str) -> bool {
        self.actions.contains_key(kind)
    }

    pub fn has_state(&self, kind: &str) -> bool {
        self.states.contains_key(kind)
    }

    /// Registered action kinds, sorted.
    pub fn action_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered state kinds, sorted.
    pub fn state_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.states.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build_action(&self, spec: &ActionSpec) -> Result<ActionRef> {
        let factory = self
            .actions
            .get(&spec.kind)
            .ok_or_else(|| WaypointError::UnknownType {
                category: "action".to_string(),
                kind: spec.kind.clone(),
            })?;
        factory(spec, self)
    }

    pub fn build_actions(&self, specs: &[ActionSpec]) -> Result<Vec<ActionRef>> {
        specs.iter().map(|spec| self.build_action(spec)).collect()
    }

    pub fn build_state(&self, spec: &StateSpec) -> Result<StateRef> {
        let factory = self
            .states
            .get(&spec.kind)
            .ok_or_else(|| WaypointError::UnknownType {
                category: "state".to_string(),
                kind: spec.kind.clone(),
            })?;
        factory(spec, self)
    }

    /// Create a registry with all built-in action and state kinds registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Leaves
        registry.register_action("noop", |spec, _| Ok(Arc::new(action::Noop::from_spec(spec))));
        registry.register_action("set", |spec, _| Ok(Arc::new(action::SetValue::from_spec(spec)?)));
        registry.register_action("copy", |spec, _| Ok(Arc::new(action::CopyValue::from_spec(spec)?)));
        registry.register_action("fail", |spec, _| Ok(Arc::new(action::Fail::from_spec(spec)?)));
        registry.register_action("delay", |spec, _| Ok(Arc::new(action::Delay::from_spec(spec)?)));
        registry.register_action("log", |spec, _| Ok(Arc::new(action::Log::from_spec(spec)?)));

        // Composites
        registry.register_action("sequence", |spec, r| {
            Ok(Arc::new(action::Sequence::from_spec(spec, r)?))
        });
        registry.register_action("conditional", |spec, r| {
            Ok(Arc::new(action::Conditional::from_spec(spec, r)?))
        });
        registry.register_action("conditional_branch", |spec, r| {
            Ok(Arc::new(action::ConditionalBranch::from_spec(spec, r)?))
        });
        registry.register_action("retry", |spec, r| Ok(Arc::new(action::Retry::from_spec(spec, r)?)));
        registry.register_action("retry_with_backoff", |spec, r| {
            Ok(Arc::new(action::RetryWithBackoff::from_spec(spec, r)?))
        });
        registry.register_action("try_with_fallback", |spec, r| {
            Ok(Arc::new(action::TryWithFallback::from_spec(spec, r)?))
        });
        registry.register_action("validated_sequence", |spec, r| {
            Ok(Arc::new(action::ValidatedSequence::from_spec(spec, r)?))
        });
        registry.register_action("parallel", |spec, r| {
            Ok(Arc::new(action::ParallelWithMerge::from_spec(spec, r)?))
        });
        registry.register_action("progressive", |spec, r| {
            Ok(Arc::new(action::ProgressiveDisclosure::from_spec(spec, r)?))
        });

        // States
        registry.register_state("action", |spec, r| Ok(Arc::new(ActionState::from_spec(spec, r)?)));
        registry.register_state("conditional", |spec, r| {
            Ok(Arc::new(ConditionalState::from_spec(spec, r)?))
        });
        registry.register_state("final", |spec, _| Ok(Arc::new(FinalState::new(spec.name.clone()))));

        registry
    }
}
