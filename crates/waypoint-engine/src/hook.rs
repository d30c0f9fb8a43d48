use tracing::{debug, warn};

use waypoint_core::hooks::{ExecutionHook, HookEvent};
use waypoint_core::types::HookPhase;

/// Emits one tracing event per action start and end.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl ExecutionHook for TracingHook {
    fn on_event(&self, event: &HookEvent<'_>) {
        match (event.phase, event.error) {
            (HookPhase::Start, _) => {
                debug!(state = %event.state, action = %event.action, "Action started");
            }
            (HookPhase::End, None) => {
                debug!(state = %event.state, action = %event.action, "Action finished");
            }
            (HookPhase::End, Some(error)) => {
                warn!(state = %event.state, action = %event.action, error = %error, "Action failed");
            }
        }
    }
}
