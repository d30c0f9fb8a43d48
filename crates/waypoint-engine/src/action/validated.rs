use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{record, Action, ActionRef, PredicateRef};
use crate::condition;
use crate::registry::Registry;

/// An action with an optional post-condition checked against the context.
pub struct ValidatedStep {
    pub action: ActionRef,
    pub validator: Option<PredicateRef>,
}

impl ValidatedStep {
    pub fn new(action: ActionRef) -> Self {
        Self {
            action,
            validator: None,
        }
    }

    pub fn validated_by(mut self, validator: PredicateRef) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// Runs steps in order, validating the context after each.
///
/// Records `{name}_completed_steps`, `{name}_valid`, and on the first problem
/// `{name}_failed_step`; every problem message goes to `{name}_errors`.
/// With `continue_on_error` failures are recorded and the run goes on.
/// A validator that itself errors always aborts.
pub struct ValidatedSequence {
    name: String,
    steps: Vec<ValidatedStep>,
    continue_on_error: bool,
}

impl ValidatedSequence {
    pub fn new(name: impl Into<String>, steps: Vec<ValidatedStep>) -> Self {
        Self {
            name: name.into(),
            steps,
            continue_on_error: false,
        }
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Params: `steps` (list of `{action, validator?}` tables), `continue_on_error`.
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let mut steps = Vec::new();
        for (i, table) in p.table_list("steps")?.iter().enumerate() {
            let owner = format!("{}.steps[{}]", spec.name(), i);
            let sp = Params::new(&owner, table);
            let mut step = ValidatedStep::new(registry.build_action(&sp.required_action("action")?)?);
            if let Some(expr) = sp.optional_str("validator")? {
                step = step.validated_by(condition::predicate(expr)?);
            }
            steps.push(step);
        }
        Ok(Self::new(spec.name(), steps)
            .continue_on_error(p.optional_bool("continue_on_error")?.unwrap_or(false)))
    }
}

impl Action for ValidatedSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut completed = 0u32;
            let mut errors: Vec<Value> = Vec::new();
            let mut failed_step: Option<usize> = None;

            for (i, step) in self.steps.iter().enumerate() {
                let problem = match step.action.execute(ctx).await {
                    Err(e) => Some(WaypointError::in_action(step.action.name(), e)),
                    Ok(()) => match &step.validator {
                        None => None,
                        Some(validator) => {
                            let valid = validator.evaluate(ctx).map_err(|e| {
                                WaypointError::in_action(format!("{}[validator {}]", self.name, i), e)
                            })?;
                            (!valid).then(|| {
                                WaypointError::failed(format!(
                                    "validation failed after step {} ({})",
                                    i,
                                    step.action.name()
                                ))
                            })
                        }
                    },
                };

                let Some(err) = problem else {
                    completed += 1;
                    record(ctx, &self.name, "completed_steps", completed);
                    continue;
                };

                if failed_step.is_none() {
                    failed_step = Some(i);
                    record(ctx, &self.name, "failed_step", i as u64);
                }
                errors.push(Value::from(err.to_string()));
                record(ctx, &self.name, "errors", errors.clone());
                record(ctx, &self.name, "valid", false);

                if !self.continue_on_error {
                    return Err(WaypointError::in_action(&self.name, err));
                }
                warn!(action = %self.name, step = i, error = %err, "Step failed, continuing");
            }

            record(ctx, &self.name, "completed_steps", completed);
            record(ctx, &self.name, "valid", failed_step.is_none());
            Ok(())
        })
    }
}
