use futures::future::BoxFuture;
use tracing::warn;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;

use super::{record, Action, ActionRef};
use crate::registry::Registry;

/// Runs `primary`; on any error records it and runs `fallback` instead.
///
/// The winner is recorded under `{name}_source` as `"primary"` or `"fallback"`.
pub struct TryWithFallback {
    name: String,
    primary: ActionRef,
    fallback: ActionRef,
}

impl TryWithFallback {
    pub fn new(name: impl Into<String>, primary: ActionRef, fallback: ActionRef) -> Self {
        Self {
            name: name.into(),
            primary,
            fallback,
        }
    }

    /// Params: `primary`, `fallback` (action specs).
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        Ok(Self::new(
            spec.name(),
            registry.build_action(&p.required_action("primary")?)?,
            registry.build_action(&p.required_action("fallback")?)?,
        ))
    }
}

impl Action for TryWithFallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let primary_err = match self.primary.execute(ctx).await {
                Ok(()) => {
                    record(ctx, &self.name, "source", "primary");
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!(
                action = %self.name,
                primary = self.primary.name(),
                error = %primary_err,
                "Primary failed, running fallback"
            );
            record(ctx, &self.name, "primary_error", primary_err.to_string());

            match self.fallback.execute(ctx).await {
                Ok(()) => {
                    record(ctx, &self.name, "source", "fallback");
                    Ok(())
                }
                Err(fallback_err) => {
                    record(ctx, &self.name, "fallback_error", fallback_err.to_string());
                    Err(WaypointError::aggregate(
                        format!("{}: primary and fallback failed", self.name),
                        vec![
                            WaypointError::in_action(self.primary.name(), primary_err),
                            WaypointError::in_action(self.fallback.name(), fallback_err),
                        ],
                    ))
                }
            }
        })
    }
}
