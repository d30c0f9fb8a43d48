//! The state machine core.
//!
//! `Engine::execute` drives a context from its current state (or the initial
//! state) until a final state is reached or an error escapes. The loop is
//! single-threaded per run; cancellation is checked once per iteration, before
//! the state is dispatched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{ConfigErrorKind, Result, WaypointError};
use waypoint_core::hooks::{ExecutionHook, HookEvent};
use waypoint_core::types::{HookPhase, TransitionResult};

use crate::state::StateRef;
use crate::transition::Transition;

/// Context key holding the message of the most recent rerouted error.
pub const LAST_ERROR: &str = "last_error";

pub struct Engine {
    name: String,
    states: HashMap<String, StateRef>,
    transitions: Vec<Transition>,
    initial: String,
    finals: HashSet<String>,
    default_timeout: Option<Duration>,
    timeouts: HashMap<String, Duration>,
    error_targets: HashMap<String, String>,
    cancellation: bool,
    hooks: Vec<Arc<dyn ExecutionHook>>,
    max_steps: Option<usize>,
}

impl Engine {
    pub fn builder(name: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    pub fn final_states(&self) -> &HashSet<String> {
        &self.finals
    }

    /// State names, sorted.
    pub fn state_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.states.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn timeout_for(&self, state: &str) -> Option<Duration> {
        self.timeouts.get(state).copied().or(self.default_timeout)
    }

    fn emit(&self, event: &HookEvent<'_>) {
        for hook in &self.hooks {
            hook.on_event(event);
        }
    }

    /// Run the workflow against `ctx`.
    ///
    /// Resumes from `ctx.current_state()` when it is set. On error the context
    /// keeps everything recorded so far for inspection.
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.current_state().is_empty() {
            ctx.set_current_state(self.initial.clone());
        }
        info!(
            workflow = %self.name,
            session = %ctx.session_id(),
            state = %ctx.current_state(),
            "Workflow started"
        );

        let mut steps = 0usize;
        let mut last_dispatched: Option<String> = None;
        loop {
            let current = ctx.current_state();

            // Report the state the run stopped after, not the one it was about to enter.
            if self.cancellation && ctx.is_cancelled() {
                let stopped = last_dispatched.unwrap_or(current);
                warn!(workflow = %self.name, state = %stopped, "Workflow cancelled");
                return Err(WaypointError::Cancelled(stopped));
            }

            if let Some(limit) = self.max_steps {
                if steps >= limit {
                    error!(workflow = %self.name, state = %current, limit, "Step limit reached");
                    return Err(WaypointError::StepLimitExceeded { state: current, limit });
                }
            }
            steps += 1;

            let state = self
                .states
                .get(&current)
                .cloned()
                .ok_or_else(|| WaypointError::StateNotFound(current.clone()))?;

            ctx.append_to_path(current.clone());
            last_dispatched = Some(current.clone());
            info!(workflow = %self.name, state = %current, "Entering state");

            let result = match self.run_state(&state, ctx).await {
                Ok(result) => result,
                Err(e) => match self.error_targets.get(&current) {
                    Some(target) if !e.is_interrupt() => {
                        warn!(
                            workflow = %self.name,
                            state = %current,
                            target = %target,
                            error = %e,
                            "State failed, continuing at error target"
                        );
                        let message = e.to_string();
                        ctx.set(LAST_ERROR, message.clone());
                        ctx.set(format!("{}_error", current), message.clone());
                        let mut data = HashMap::new();
                        data.insert(LAST_ERROR.to_string(), message.into());
                        ctx.add_transition(current.clone(), target.clone(), data);
                        ctx.set_current_state(target.clone());
                        continue;
                    }
                    _ => {
                        error!(workflow = %self.name, state = %current, error = %e, "State failed");
                        return Err(WaypointError::in_state(current, e));
                    }
                },
            };

            if result.complete || self.finals.contains(&result.next_state) {
                let target = if result.next_state.is_empty() {
                    current.clone()
                } else {
                    result.next_state.clone()
                };
                if target != current {
                    ctx.add_transition(current.clone(), target.clone(), result.data.clone());
                }
                ctx.merge(result.data);
                ctx.set_current_state(target.clone());
                info!(workflow = %self.name, state = %target, "Workflow completed");
                return Ok(());
            }

            let next = self.resolve(&current, &result, ctx)?;
            debug!(workflow = %self.name, from = %current, to = %next, "Transition taken");
            ctx.add_transition(current.clone(), next.clone(), result.data.clone());
            ctx.merge(result.data);
            ctx.set_current_state(next);
        }
    }

    async fn run_state(&self, state: &StateRef, ctx: &ExecutionContext) -> Result<TransitionResult> {
        let action = state.action_name();
        self.emit(&HookEvent {
            action,
            state: state.name(),
            phase: HookPhase::Start,
            error: None,
        });

        let result = match self.timeout_for(state.name()) {
            Some(limit) => match tokio::time::timeout(limit, state.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(WaypointError::DeadlineExceeded(format!(
                    "state {} exceeded {}ms",
                    state.name(),
                    limit.as_millis()
                ))),
            },
            None => state.execute(ctx).await,
        };

        let message = result.as_ref().err().map(|e| e.to_string());
        self.emit(&HookEvent {
            action,
            state: state.name(),
            phase: HookPhase::End,
            error: message.as_deref(),
        });
        result
    }

    /// Pick the next state: the preferred target first, then the first
    /// matching transition in registration order.
    fn resolve(&self, current: &str, result: &TransitionResult, ctx: &ExecutionContext) -> Result<String> {
        let outgoing = || self.transitions.iter().filter(move |t| t.from == current);
        let check = |t: &Transition| {
            t.evaluate(ctx).map_err(|e| WaypointError::Transition {
                from: t.from.clone(),
                to: t.to.clone(),
                source: Box::new(e),
            })
        };

        if !result.next_state.is_empty() {
            for t in outgoing().filter(|t| t.to == result.next_state) {
                if check(t)? {
                    return Ok(t.to.clone());
                }
            }
            debug!(
                from = %current,
                preferred = %result.next_state,
                "Preferred transition did not match, scanning all"
            );
        }

        for t in outgoing() {
            if check(t)? {
                return Ok(t.to.clone());
            }
        }

        Err(WaypointError::TransitionNotFound {
            from: current.to_string(),
        })
    }
}

/// Assembles and validates an [`Engine`].
pub struct EngineBuilder {
    name: String,
    states: Vec<StateRef>,
    transitions: Vec<Transition>,
    initial: Option<String>,
    finals: Vec<String>,
    default_timeout: Option<Duration>,
    timeouts: HashMap<String, Duration>,
    error_targets: HashMap<String, String>,
    cancellation: bool,
    hooks: Vec<Arc<dyn ExecutionHook>>,
    max_steps: Option<usize>,
}

impl EngineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            transitions: Vec::new(),
            initial: None,
            finals: Vec::new(),
            default_timeout: None,
            timeouts: HashMap::new(),
            error_targets: HashMap::new(),
            cancellation: true,
            hooks: Vec::new(),
            max_steps: None,
        }
    }

    pub fn state(mut self, state: StateRef) -> Self {
        self.states.push(state);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    pub fn final_state(mut self, state: impl Into<String>) -> Self {
        self.finals.push(state.into());
        self
    }

    /// Per-state timeout. A zero duration means unbounded.
    pub fn timeout(mut self, state: impl Into<String>, limit: Duration) -> Self {
        let state = state.into();
        if limit.is_zero() {
            self.timeouts.remove(&state);
        } else {
            self.timeouts.insert(state, limit);
        }
        self
    }

    /// Timeout for states without their own. A zero duration means unbounded.
    pub fn default_timeout(mut self, limit: Duration) -> Self {
        self.default_timeout = (!limit.is_zero()).then_some(limit);
        self
    }

    /// Continue at `target` when `state` fails instead of aborting the run.
    pub fn on_error(mut self, state: impl Into<String>, target: impl Into<String>) -> Self {
        self.error_targets.insert(state.into(), target.into());
        self
    }

    pub fn cancellation(mut self, enabled: bool) -> Self {
        self.cancellation = enabled;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Abort after this many state dispatches. Unbounded by default.
    pub fn max_steps(mut self, limit: usize) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let mut states = HashMap::new();
        let mut finals: HashSet<String> = self.finals.into_iter().collect();
        for state in self.states {
            let name = state.name().to_string();
            if state.is_final() {
                finals.insert(name.clone());
            }
            if states.insert(name.clone(), state).is_some() {
                return Err(WaypointError::validation(
                    ConfigErrorKind::UniqueName,
                    format!("duplicate state: {}", name),
                ));
            }
        }

        let initial = self.initial.filter(|s| !s.is_empty()).ok_or_else(|| {
            WaypointError::validation(ConfigErrorKind::MissingField, "initial state is required")
        })?;
        let missing = |name: &str, role: &str| {
            WaypointError::validation(
                ConfigErrorKind::MissingEndpoint,
                format!("{} references unknown state: {}", role, name),
            )
        };

        if !states.contains_key(&initial) {
            return Err(missing(&initial, "initial state"));
        }
        for name in &finals {
            if !states.contains_key(name) {
                return Err(missing(name, "final state"));
            }
        }
        for t in &self.transitions {
            if !states.contains_key(&t.from) {
                return Err(missing(&t.from, "transition source"));
            }
            if !states.contains_key(&t.to) {
                return Err(missing(&t.to, "transition target"));
            }
        }
        for (state, target) in &self.error_targets {
            if !states.contains_key(state) {
                return Err(missing(state, "error handler"));
            }
            if !states.contains_key(target) {
                return Err(missing(target, "error target"));
            }
        }

        Ok(Engine {
            name: self.name,
            states,
            transitions: self.transitions,
            initial,
            finals,
            default_timeout: self.default_timeout,
            timeouts: self.timeouts,
            error_targets: self.error_targets,
            cancellation: self.cancellation,
            hooks: self.hooks,
            max_steps: self.max_steps,
        })
    }
}
