//! Concurrent composition over cloned contexts.
//!
//! Each branch runs on its own deep copy of the context in its own task.
//! Nothing touches the shared context until every branch has finished; the
//! chosen merge is then applied once, in branch index order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::{debug, warn};

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{Action, ActionRef};
use crate::registry::Registry;

/// Which successful branches are merged back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The lowest-indexed successful branch.
    First,
    /// Every successful branch, but only when more than half succeeded.
    Majority,
    /// Every successful branch.
    #[default]
    All,
}

impl MergeStrategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "first" => Some(Self::First),
            "majority" => Some(Self::Majority),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Majority => f.write_str("majority"),
            Self::All => f.write_str("all"),
        }
    }
}

pub struct ParallelWithMerge {
    name: String,
    actions: Vec<ActionRef>,
    strategy: MergeStrategy,
    continue_on_error: bool,
}

impl ParallelWithMerge {
    pub fn new(name: impl Into<String>, actions: Vec<ActionRef>, strategy: MergeStrategy) -> Self {
        Self {
            name: name.into(),
            actions,
            strategy,
            continue_on_error: false,
        }
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Params: `actions`, `merge` (`first` | `majority` | `all`), `continue_on_error`.
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let strategy = match p.optional_str("merge")? {
            Some(name) => MergeStrategy::parse(name)
                .ok_or_else(|| p.mismatch("merge", "first | majority | all"))?,
            None => MergeStrategy::default(),
        };
        let actions = registry.build_actions(&p.action_list("actions")?)?;
        Ok(Self::new(spec.name(), actions, strategy)
            .continue_on_error(p.optional_bool("continue_on_error")?.unwrap_or(false)))
    }

    /// Pick which successful branch deltas to apply, in index order.
    fn select(&self, successes: Vec<HashMap<String, Value>>, total: usize) -> Vec<HashMap<String, Value>> {
        match self.strategy {
            MergeStrategy::First => successes.into_iter().take(1).collect(),
            MergeStrategy::Majority if successes.len() * 2 > total => successes,
            MergeStrategy::Majority => {
                debug!(
                    action = %self.name,
                    successes = successes.len(),
                    total,
                    "No majority, skipping merge"
                );
                Vec::new()
            }
            MergeStrategy::All => successes,
        }
    }
}

/// Keys a branch added or changed relative to `base`.
fn delta(base: &HashMap<String, Value>, branch: HashMap<String, Value>) -> HashMap<String, Value> {
    branch
        .into_iter()
        .filter(|(k, v)| base.get(k) != Some(v))
        .collect()
}

impl Action for ParallelWithMerge {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let base = ctx.data();
            let handles = self.actions.iter().map(|action| {
                let action = Arc::clone(action);
                let branch = ctx.clone();
                tokio::spawn(async move {
                    let result = action.execute(&branch).await;
                    (branch, result)
                })
            });
            let outcomes = join_all(handles).await;

            let total = self.actions.len();
            let mut successes = Vec::new();
            let mut failures = Vec::new();
            for (action, outcome) in self.actions.iter().zip(outcomes) {
                match outcome {
                    Ok((branch, Ok(()))) => successes.push(delta(&base, branch.data())),
                    Ok((_, Err(e))) => failures.push(WaypointError::in_action(action.name(), e)),
                    Err(join_err) => failures.push(WaypointError::in_action(
                        action.name(),
                        WaypointError::failed(format!("branch task failed: {}", join_err)),
                    )),
                }
            }

            if !failures.is_empty() {
                if !self.continue_on_error {
                    return Err(WaypointError::aggregate(self.name.clone(), failures));
                }
                for err in &failures {
                    warn!(action = %self.name, error = %err, "Parallel branch failed, continuing");
                }
            }

            let selected = self.select(successes, total);
            debug!(
                action = %self.name,
                strategy = %self.strategy,
                merged = selected.len(),
                total,
                "Merging parallel results"
            );
            for data in selected {
                ctx.merge(data);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Fail, FnAction, SetValue};
    use std::time::Duration;

    fn ok(key: &str) -> ActionRef {
        Arc::new(SetValue::new(key, key, true))
    }

    fn fail(name: &str) -> ActionRef {
        Arc::new(Fail::new(name, format!("{} failed", name)))
    }

    #[tokio::test]
    async fn test_majority_requires_more_than_half() {
        let ctx = ExecutionContext::new();
        ctx.set("seed", 1);
        let one_of_three = ParallelWithMerge::new(
            "fan",
            vec![ok("a"), fail("b"), fail("c")],
            MergeStrategy::Majority,
        )
        .continue_on_error(true);
        one_of_three.execute(&ctx).await.unwrap();
        assert_eq!(ctx.data().len(), 1);

        let two_of_three = ParallelWithMerge::new(
            "fan",
            vec![ok("a"), ok("b"), fail("c")],
            MergeStrategy::Majority,
        )
        .continue_on_error(true);
        two_of_three.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_bool("a"), Some(true));
        assert_eq!(ctx.get_bool("b"), Some(true));
        assert!(!ctx.contains("c"));
    }

    #[tokio::test]
    async fn test_first_uses_index_order() {
        // Branch 0 finishes last but still wins.
        let slow: ActionRef = Arc::new(SlowSet { delay_ms: 20, value: "slow" });
        let fast: ActionRef = Arc::new(SlowSet { delay_ms: 0, value: "fast" });
        let action = ParallelWithMerge::new("fan", vec![slow, fast], MergeStrategy::First);
        let ctx = ExecutionContext::new();
        action.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("winner").as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn test_failure_is_fatal_and_nothing_merges() {
        let action = ParallelWithMerge::new("fan", vec![ok("a"), fail("b"), fail("c")], MergeStrategy::All);
        let ctx = ExecutionContext::new();
        let err = action.execute(&ctx).await.unwrap_err();

        match &err {
            WaypointError::Aggregate(agg) => assert_eq!(agg.errors.len(), 2),
            other => panic!("expected aggregate, got {other}"),
        }
        assert!(err.to_string().contains("b failed"));
        assert!(err.to_string().contains("c failed"));
        assert!(!ctx.contains("a"));
    }

    #[tokio::test]
    async fn test_branches_are_isolated() {
        let reader: ActionRef = Arc::new(FnAction::new("reader", |ctx: &ExecutionContext| {
            ctx.set("saw_writer", ctx.contains("written"));
            Ok(())
        }));
        let writer = ok("written");
        let action = ParallelWithMerge::new("fan", vec![reader, writer], MergeStrategy::All);
        let ctx = ExecutionContext::new();
        action.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_bool("saw_writer"), Some(false));
        assert_eq!(ctx.get_bool("written"), Some(true));
    }

    #[tokio::test]
    async fn test_unchanged_keys_are_not_remerged() {
        let ctx = ExecutionContext::new();
        ctx.set("shared", "base");
        let overwrite: ActionRef = Arc::new(SetValue::new("w", "shared", "changed"));
        let idle: ActionRef = Arc::new(SetValue::new("idle", "other", 1));
        // The idle branch still carries `shared = "base"` but must not undo branch 0.
        let action = ParallelWithMerge::new("fan", vec![overwrite, idle], MergeStrategy::All);
        action.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("shared").as_deref(), Some("changed"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(MergeStrategy::parse("first"), Some(MergeStrategy::First));
        assert_eq!(MergeStrategy::parse("Majority"), Some(MergeStrategy::Majority));
        assert_eq!(MergeStrategy::parse(" all "), Some(MergeStrategy::All));
        assert_eq!(MergeStrategy::parse("whatever"), None);
    }

    #[test]
    fn test_unknown_merge_strategy_rejected() {
        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "parallel",
            "name": "fan",
            "params": {
                "merge": "majorty",
                "actions": [{"type": "noop"}]
            }
        }))
        .unwrap();
        let err = ParallelWithMerge::from_spec(&spec, &Registry::with_builtins())
            .err()
            .expect("unknown merge name");
        match err {
            WaypointError::Parameter { name, kind } => {
                assert_eq!(name, "fan.merge");
                assert!(matches!(
                    kind,
                    waypoint_core::error::ParamErrorKind::TypeMismatch { .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut spec = spec;
        spec.params.remove("merge");
        assert!(ParallelWithMerge::from_spec(&spec, &Registry::with_builtins()).is_ok());
    }

    struct SlowSet {
        delay_ms: u64,
        value: &'static str,
    }

    impl Action for SlowSet {
        fn name(&self) -> &str {
            self.value
        }

        fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                ctx.set("winner", self.value);
                Ok(())
            })
        }
    }
}
