use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::config::StateSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{ConfigErrorKind, Result, WaypointError};
use waypoint_core::params::Params;
use waypoint_core::types::TransitionResult;

use crate::action::{ActionRef, PredicateRef, Sequence};
use crate::condition;
use crate::registry::Registry;

/// A named node of the workflow graph.
pub trait State: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Name reported to execution hooks.
    fn action_name(&self) -> &str {
        self.name()
    }

    fn is_final(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<TransitionResult>>;
}

pub type StateRef = Arc<dyn State>;

/// Runs one action and lets the registered transitions pick what comes next.
pub struct ActionState {
    name: String,
    action: ActionRef,
}

impl ActionState {
    pub fn new(name: impl Into<String>, action: ActionRef) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }

    /// Several configured actions run as a sequence named after the state.
    pub fn from_spec(spec: &StateSpec, registry: &Registry) -> Result<Self> {
        let mut actions = registry.build_actions(&spec.actions)?;
        let action = match actions.len() {
            0 => {
                return Err(WaypointError::validation(
                    ConfigErrorKind::MissingField,
                    format!("action state {} has no actions", spec.name),
                ))
            }
            1 => actions.remove(0),
            _ => Arc::new(Sequence::new(spec.name.clone(), actions)),
        };
        Ok(Self::new(spec.name.clone(), action))
    }
}

impl State for ActionState {
    fn name(&self) -> &str {
        &self.name
    }

    fn action_name(&self) -> &str {
        self.action.name()
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<TransitionResult>> {
        Box::pin(async move {
            self.action.execute(ctx).await?;
            Ok(TransitionResult::proceed())
        })
    }
}

/// Prefers `then` or `else` depending on a predicate. Without a predicate,
/// or when the chosen side is unset, the transitions decide.
pub struct ConditionalState {
    name: String,
    predicate: Option<PredicateRef>,
    then: Option<String>,
    otherwise: Option<String>,
}

impl ConditionalState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicate: None,
            then: None,
            otherwise: None,
        }
    }

    pub fn when(mut self, predicate: PredicateRef, then: impl Into<String>) -> Self {
        self.predicate = Some(predicate);
        self.then = Some(then.into());
        self
    }

    pub fn otherwise(mut self, state: impl Into<String>) -> Self {
        self.otherwise = Some(state.into());
        self
    }

    /// Params: `condition`, `then`, `else`.
    pub fn from_spec(spec: &StateSpec, _registry: &Registry) -> Result<Self> {
        let p = Params::new(&spec.name, &spec.params);
        let mut state = Self::new(spec.name.clone());
        if let Some(expr) = p.optional_str("condition")? {
            state.predicate = Some(condition::predicate(expr)?);
        }
        state.then = p.optional_str("then")?.map(str::to_string);
        state.otherwise = p.optional_str("else")?.map(str::to_string);
        Ok(state)
    }
}

impl State for ConditionalState {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<TransitionResult>> {
        Box::pin(async move {
            let Some(predicate) = &self.predicate else {
                return Ok(TransitionResult::proceed());
            };
            let preferred = if predicate.evaluate(ctx)? {
                &self.then
            } else {
                &self.otherwise
            };
            Ok(match preferred {
                Some(next) => TransitionResult::to(next.clone()),
                None => TransitionResult::proceed(),
            })
        })
    }
}

/// Terminal state: completes the run where it stands.
pub struct FinalState {
    name: String,
}

impl FinalState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl State for FinalState {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_final(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<TransitionResult>> {
        Box::pin(async move { Ok(TransitionResult::complete(self.name.clone())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{key_equals, SetValue};
    use waypoint_core::config::ActionSpec;

    #[tokio::test]
    async fn test_action_state_runs_action() {
        let state = ActionState::new("collect", Arc::new(SetValue::new("mark", "seen", true)));
        let ctx = ExecutionContext::new();
        let result = state.execute(&ctx).await.unwrap();
        assert_eq!(result, TransitionResult::proceed());
        assert_eq!(state.action_name(), "mark");
        assert_eq!(ctx.get_bool("seen"), Some(true));
    }

    #[test]
    fn test_action_state_wraps_multiple_actions() {
        let spec = StateSpec::new("collect", "action")
            .with_action(ActionSpec::new("noop"))
            .with_action(ActionSpec::new("noop"));
        let state = ActionState::from_spec(&spec, &Registry::with_builtins()).unwrap();
        assert_eq!(state.action_name(), "collect");

        let empty = StateSpec::new("empty", "action");
        assert!(ActionState::from_spec(&empty, &Registry::with_builtins()).is_err());
    }

    #[tokio::test]
    async fn test_conditional_state_prefers_branch() {
        let state = ConditionalState::new("route")
            .when(key_equals("approved", true), "publish")
            .otherwise("review");

        let ctx = ExecutionContext::new();
        ctx.set("approved", true);
        assert_eq!(state.execute(&ctx).await.unwrap().next_state, "publish");

        let ctx = ExecutionContext::new();
        assert_eq!(state.execute(&ctx).await.unwrap().next_state, "review");

        let open = ConditionalState::new("route");
        assert_eq!(open.execute(&ctx).await.unwrap(), TransitionResult::proceed());
    }

    #[tokio::test]
    async fn test_final_state_completes() {
        let state = FinalState::new("done");
        assert!(state.is_final());
        let result = state.execute(&ExecutionContext::new()).await.unwrap();
        assert!(result.complete);
        assert_eq!(result.next_state, "done");
    }
}
