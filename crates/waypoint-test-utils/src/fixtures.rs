use waypoint_core::config::{ActionSpec, StateSpec, TransitionSpec, WorkflowConfig};

/// `a -> b -> c`, where `a` and `b` are no-op action states and `c` is final.
pub fn linear_config() -> WorkflowConfig {
    WorkflowConfig::new("linear", "a")
        .with_state(StateSpec::new("a", "action").with_action(ActionSpec::new("noop")))
        .with_state(StateSpec::new("b", "action").with_action(ActionSpec::new("noop")))
        .with_state(StateSpec::new("c", "final"))
        .with_transition(TransitionSpec::always("a", "b"))
        .with_transition(TransitionSpec::always("b", "c"))
}

/// Routes on `provider` to `salesforce`, `hubspot`, or `manual` (all final).
pub fn provider_config() -> WorkflowConfig {
    WorkflowConfig::new("provider_setup", "detect")
        .with_state(StateSpec::new("detect", "action").with_action(ActionSpec::new("noop")))
        .with_state(StateSpec::new("salesforce", "final"))
        .with_state(StateSpec::new("hubspot", "final"))
        .with_state(StateSpec::new("manual", "final"))
        .with_transition(TransitionSpec::when(
            "detect",
            "salesforce",
            r#"data.provider == "salesforce""#,
        ))
        .with_transition(TransitionSpec::when(
            "detect",
            "hubspot",
            r#"data.provider == "hubspot""#,
        ))
        .with_transition(TransitionSpec::always("detect", "manual"))
}

/// TOML form of a small onboarding workflow exercising composite actions.
pub const ONBOARDING_TOML: &str = r#"
name = "onboarding"
initial_state = "collect"
final_states = ["done"]

[settings]
cancellation = true
action_timeout_secs = 30

[[states]]
name = "collect"
on_error = "recover"

[[states.actions]]
type = "set"
name = "mark_provider"
params = { key = "provider", value = "hubspot" }

[[states.actions]]
type = "try_with_fallback"
name = "fetch"

[states.actions.params.primary]
type = "fail"
params = { message = "api unavailable" }

[states.actions.params.fallback]
type = "set"
params = { key = "records", value = 12 }

[[states]]
name = "route"
kind = "conditional"
params = { condition = "data.provider == \"hubspot\"", then = "done", else = "recover" }

[[states]]
name = "recover"

[[states.actions]]
type = "log"
params = { message = "recovering after {last_error}" }

[[states]]
name = "done"
kind = "final"

[[transitions]]
from = "collect"
to = "route"

[[transitions]]
from = "route"
to = "done"

[[transitions]]
from = "route"
to = "recover"

[[transitions]]
from = "recover"
to = "done"
"#;
