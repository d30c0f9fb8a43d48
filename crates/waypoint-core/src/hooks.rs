use crate::types::HookPhase;

/// What the engine reports to hooks around each state's action.
#[derive(Debug, Clone)]
pub struct HookEvent<'a> {
    pub action: &'a str,
    pub state: &'a str,
    pub phase: HookPhase,
    /// Set on the `End` phase when the state failed.
    pub error: Option<&'a str>,
}

/// Observer invoked by the engine on action start/end.
///
/// This is the integration point for logging, metrics, and tracing sinks.
/// Hooks are fire-and-forget: they cannot fail the run.
pub trait ExecutionHook: Send + Sync + 'static {
    fn on_event(&self, event: &HookEvent<'_>);
}

impl<F> ExecutionHook for F
where
    F: Fn(&HookEvent<'_>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &HookEvent<'_>) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook = move |e: &HookEvent<'_>| {
            sink.lock()
                .unwrap()
                .push(format!("{}:{}:{}", e.state, e.action, e.phase));
        };

        hook.on_event(&HookEvent {
            action: "mark",
            state: "collect",
            phase: HookPhase::Start,
            error: None,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["collect:mark:start".to_string()]);
    }
}
