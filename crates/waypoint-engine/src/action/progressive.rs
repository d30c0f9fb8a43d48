use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{record, Action, ActionRef, PredicateRef};
use crate::condition;
use crate::registry::Registry;

/// A gated step of a [`ProgressiveDisclosure`].
pub struct DisclosureStep {
    pub action: ActionRef,
    pub predicate: Option<PredicateRef>,
    pub required: bool,
}

impl DisclosureStep {
    /// An ungated, optional step.
    pub fn new(action: ActionRef) -> Self {
        Self {
            action,
            predicate: None,
            required: false,
        }
    }

    pub fn when(mut self, predicate: PredicateRef) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Runs steps in order, each gated by an optional predicate.
///
/// Optional steps that are gated off or fail are skipped. A required step
/// that is gated off or fails aborts the run. Indexes of completed and
/// skipped steps are recorded under `{name}_completed` and `{name}_skipped`.
pub struct ProgressiveDisclosure {
    name: String,
    steps: Vec<DisclosureStep>,
}

impl ProgressiveDisclosure {
    pub fn new(name: impl Into<String>, steps: Vec<DisclosureStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Params: `steps` (list of `{action, condition?, required?}` tables).
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let mut steps = Vec::new();
        for (i, table) in p.table_list("steps")?.iter().enumerate() {
            let owner = format!("{}.steps[{}]", spec.name(), i);
            let sp = Params::new(&owner, table);
            let mut step = DisclosureStep::new(registry.build_action(&sp.required_action("action")?)?);
            if let Some(expr) = sp.optional_str("condition")? {
                step = step.when(condition::predicate(expr)?);
            }
            if sp.optional_bool("required")?.unwrap_or(false) {
                step = step.required();
            }
            steps.push(step);
        }
        Ok(Self::new(spec.name(), steps))
    }

    fn step_error(&self, index: usize, source: WaypointError) -> WaypointError {
        WaypointError::in_action(format!("{}[step {}]", self.name, index), source)
    }
}

impl Action for ProgressiveDisclosure {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut completed: Vec<Value> = Vec::new();
            let mut skipped: Vec<Value> = Vec::new();

            for (i, step) in self.steps.iter().enumerate() {
                let enabled = match &step.predicate {
                    Some(predicate) => predicate
                        .evaluate(ctx)
                        .map_err(|e| self.step_error(i, e))?,
                    None => true,
                };

                if !enabled {
                    if step.required {
                        return Err(self.step_error(
                            i,
                            WaypointError::failed(format!(
                                "required step {} is not enabled",
                                step.action.name()
                            )),
                        ));
                    }
                    debug!(action = %self.name, step = i, "Step gated off, skipping");
                    skipped.push(Value::from(i as u64));
                    record(ctx, &self.name, "skipped", skipped.clone());
                    continue;
                }

                match step.action.execute(ctx).await {
                    Ok(()) => {
                        completed.push(Value::from(i as u64));
                        record(ctx, &self.name, "completed", completed.clone());
                    }
                    Err(e) if step.required => return Err(self.step_error(i, e)),
                    Err(e) => {
                        warn!(action = %self.name, step = i, error = %e, "Optional step failed, skipping");
                        skipped.push(Value::from(i as u64));
                        record(ctx, &self.name, "skipped", skipped.clone());
                    }
                }
            }

            record(ctx, &self.name, "completed", completed);
            record(ctx, &self.name, "skipped", skipped);
            Ok(())
        })
    }
}
