use futures::future::BoxFuture;
use tracing::debug;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{record, Action, ActionRef, PredicateRef};
use crate::condition;
use crate::registry::Registry;

/// Context key naming the branch a [`ConditionalBranch`] ran (-1 for default or none).
pub const BRANCH_TAKEN: &str = "branch_taken";

/// Runs `then` when the predicate holds, `else` otherwise. Either may be absent.
pub struct Conditional {
    name: String,
    predicate: PredicateRef,
    then: Option<ActionRef>,
    otherwise: Option<ActionRef>,
}

impl Conditional {
    pub fn new(name: impl Into<String>, predicate: PredicateRef) -> Self {
        Self {
            name: name.into(),
            predicate,
            then: None,
            otherwise: None,
        }
    }

    pub fn then(mut self, action: ActionRef) -> Self {
        self.then = Some(action);
        self
    }

    pub fn otherwise(mut self, action: ActionRef) -> Self {
        self.otherwise = Some(action);
        self
    }

    /// Params: `condition` (expression), optional `then` and `else` action specs.
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let mut action = Self::new(spec.name(), condition::predicate(p.required_str("condition")?)?);
        if let Some(then) = p.optional_action("then")? {
            action.then = Some(registry.build_action(&then)?);
        }
        if let Some(otherwise) = p.optional_action("else")? {
            action.otherwise = Some(registry.build_action(&otherwise)?);
        }
        Ok(action)
    }
}

impl Action for Conditional {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let matched = self
                .predicate
                .evaluate(ctx)
                .map_err(|e| WaypointError::in_action(&self.name, e))?;
            record(ctx, &self.name, "condition", matched);

            let branch = if matched { &self.then } else { &self.otherwise };
            match branch {
                Some(action) => action.execute(ctx).await,
                None => Ok(()),
            }
        })
    }
}

/// One predicate/action pair of a [`ConditionalBranch`].
pub struct Branch {
    pub predicate: PredicateRef,
    pub action: ActionRef,
}

impl Branch {
    pub fn new(predicate: PredicateRef, action: ActionRef) -> Self {
        Self { predicate, action }
    }
}

/// Runs the first branch whose predicate holds, or the default.
///
/// Records the chosen index under both `branch_taken` and
/// `{name}_branch_taken`; `-1` means the default ran or nothing matched.
pub struct ConditionalBranch {
    name: String,
    branches: Vec<Branch>,
    default: Option<ActionRef>,
}

impl ConditionalBranch {
    pub fn new(name: impl Into<String>, branches: Vec<Branch>) -> Self {
        Self {
            name: name.into(),
            branches,
            default: None,
        }
    }

    pub fn with_default(mut self, action: ActionRef) -> Self {
        self.default = Some(action);
        self
    }

    /// Params: `branches` (list of `{condition, action}` tables), optional `default`.
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let mut branches = Vec::new();
        for (i, table) in p.table_list("branches")?.iter().enumerate() {
            let owner = format!("{}.branches[{}]", spec.name(), i);
            let bp = Params::new(&owner, table);
            branches.push(Branch::new(
                condition::predicate(bp.required_str("condition")?)?,
                registry.build_action(&bp.required_action("action")?)?,
            ));
        }
        let mut action = Self::new(spec.name(), branches);
        if let Some(default) = p.optional_action("default")? {
            action.default = Some(registry.build_action(&default)?);
        }
        Ok(action)
    }

    fn mark(&self, ctx: &ExecutionContext, index: i64) {
        ctx.set(BRANCH_TAKEN, index);
        record(ctx, &self.name, BRANCH_TAKEN, index);
    }
}

impl Action for ConditionalBranch {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for (i, branch) in self.branches.iter().enumerate() {
                let matched = branch
                    .predicate
                    .evaluate(ctx)
                    .map_err(|e| WaypointError::in_action(format!("{}[branch {}]", self.name, i), e))?;
                if !matched {
                    continue;
                }
                debug!(action = %self.name, branch = i, "Branch selected");
                self.mark(ctx, i as i64);
                return branch
                    .action
                    .execute(ctx)
                    .await
                    .map_err(|e| WaypointError::in_action(format!("{}[branch {}]", self.name, i), e));
            }

            self.mark(ctx, -1);
            match &self.default {
                Some(action) => {
                    debug!(action = %self.name, "Default branch selected");
                    action
                        .execute(ctx)
                        .await
                        .map_err(|e| WaypointError::in_action(format!("{}[default]", self.name), e))
                }
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{key_equals, when, Fail, SetValue};
    use std::sync::Arc;

    fn router() -> ConditionalBranch {
        ConditionalBranch::new(
            "route",
            vec![
                Branch::new(
                    key_equals("provider", "salesforce"),
                    Arc::new(SetValue::new("sf", "ran", "salesforce")),
                ),
                Branch::new(
                    key_equals("provider", "hubspot"),
                    Arc::new(SetValue::new("hs", "ran", "hubspot")),
                ),
            ],
        )
        .with_default(Arc::new(SetValue::new("fallback", "ran", "default")))
    }

    #[tokio::test]
    async fn test_branch_selects_matching_index() {
        let ctx = ExecutionContext::new();
        ctx.set("provider", "hubspot");
        router().execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_int(BRANCH_TAKEN), Some(1));
        assert_eq!(ctx.get_int("route_branch_taken"), Some(1));
        assert_eq!(ctx.get_string("ran").as_deref(), Some("hubspot"));
    }

    #[tokio::test]
    async fn test_branch_default() {
        let ctx = ExecutionContext::new();
        ctx.set("provider", "other");
        router().execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_int(BRANCH_TAKEN), Some(-1));
        assert_eq!(ctx.get_string("ran").as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_branch_error_names_index() {
        let action = ConditionalBranch::new(
            "route",
            vec![Branch::new(when(|_| Ok(true)), Arc::new(Fail::new("boom", "nope")))],
        );
        let err = action.execute(&ExecutionContext::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Action route[branch 0] failed: nope");
    }

    #[tokio::test]
    async fn test_conditional_branches() {
        let cond = || {
            Conditional::new("gate", key_equals("ready", true))
                .then(Arc::new(SetValue::new("yes", "path", "then")))
                .otherwise(Arc::new(SetValue::new("no", "path", "else")))
        };

        let ctx = ExecutionContext::new();
        ctx.set("ready", true);
        cond().execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("path").as_deref(), Some("then"));
        assert_eq!(ctx.get_bool("gate_condition"), Some(true));

        let ctx = ExecutionContext::new();
        cond().execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("path").as_deref(), Some("else"));
    }

    #[tokio::test]
    async fn test_conditional_errors() {
        let ctx = ExecutionContext::new();
        let bad_predicate = Conditional::new("gate", when(|_| Err(WaypointError::failed("no data"))));
        let err = bad_predicate.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Action gate failed: no data");

        // Branch errors surface unwrapped.
        let failing = Conditional::new("gate", when(|_| Ok(true)))
            .then(Arc::new(Fail::new("inner", "branch broke")));
        let err = failing.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "branch broke");

        // Missing branch is a no-op.
        Conditional::new("gate", when(|_| Ok(false)))
            .execute(&ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_branch_from_spec() {
        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "conditional_branch",
            "name": "route",
            "params": {
                "branches": [
                    {"condition": "provider == \"salesforce\"", "action": {"type": "set", "params": {"key": "ran", "value": "sf"}}},
                    {"condition": "provider == \"hubspot\"", "action": {"type": "set", "params": {"key": "ran", "value": "hs"}}}
                ],
                "default": {"type": "noop"}
            }
        }))
        .unwrap();
        let action = ConditionalBranch::from_spec(&spec, &Registry::with_builtins()).unwrap();

        let ctx = ExecutionContext::new();
        ctx.set("provider", "hubspot");
        action.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("ran").as_deref(), Some("hs"));
        assert_eq!(ctx.get_int(BRANCH_TAKEN), Some(1));
    }
}
