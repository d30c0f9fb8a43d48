use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use waypoint_core::config::WorkflowConfig;
use waypoint_core::error::Result;
use waypoint_core::graph::StateGraph;
use waypoint_core::hooks::ExecutionHook;

use crate::engine::Engine;
use crate::registry::Registry;
use crate::transition::Transition;

/// Turns a validated [`WorkflowConfig`] into an [`Engine`].
///
/// The registry and hooks are injected here; nothing is looked up globally.
pub struct WorkflowBuilder {
    registry: Registry,
    hooks: Vec<Arc<dyn ExecutionHook>>,
    max_steps: Option<usize>,
}

impl WorkflowBuilder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            hooks: Vec::new(),
            max_steps: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_max_steps(mut self, limit: usize) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn build(&self, config: &WorkflowConfig) -> Result<Engine> {
        config.validate()?;

        let mut builder = Engine::builder(config.name.clone())
            .initial(config.initial_state.clone())
            .cancellation(config.settings.cancellation)
            .default_timeout(Duration::from_secs(config.settings.action_timeout_secs));

        for spec in &config.states {
            builder = builder.state(self.registry.build_state(spec)?);
            if let Some(limit) = spec.timeout() {
                builder = builder.timeout(spec.name.clone(), limit);
            }
            if let Some(target) = &spec.on_error {
                builder = builder.on_error(spec.name.clone(), target.clone());
            }
        }
        for name in &config.final_states {
            builder = builder.final_state(name.clone());
        }
        for t in &config.transitions {
            builder = builder.transition(Transition::expression(&t.from, &t.to, &t.condition)?);
        }
        for hook in &self.hooks {
            builder = builder.hook(Arc::clone(hook));
        }
        if let Some(limit) = self.max_steps {
            builder = builder.max_steps(limit);
        }

        for state in StateGraph::from_config(config).unreachable_from(&config.initial_state) {
            warn!(workflow = %config.name, state = %state, "State is unreachable from the initial state");
        }

        let engine = builder.build()?;
        debug!(
            workflow = %config.name,
            states = config.states.len(),
            transitions = config.transitions.len(),
            "Engine built"
        );
        Ok(engine)
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new(Registry::with_builtins())
    }
}
