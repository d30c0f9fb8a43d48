use futures::future::BoxFuture;
use tracing::debug;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{Action, ActionRef};
use crate::registry::Registry;

/// Runs nested actions strictly in order, stopping at the first failure.
pub struct Sequence {
    name: String,
    actions: Vec<ActionRef>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Params: `actions` (list of action specs).
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let actions = registry.build_actions(&p.action_list("actions")?)?;
        Ok(Self::new(spec.name(), actions))
    }

    pub fn actions(&self) -> &[ActionRef] {
        &self.actions
    }
}

impl Action for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for (i, action) in self.actions.iter().enumerate() {
                debug!(sequence = %self.name, step = i, action = action.name(), "Running step");
                action
                    .execute(ctx)
                    .await
                    .map_err(|e| WaypointError::in_action(action.name(), e))?;
            }
            Ok(())
        })
    }
}
