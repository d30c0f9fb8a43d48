//! Static analysis of workflow configs.
//!
//! Unlike [`WorkflowConfig::validate`], which stops at the first violation,
//! the linter reports every finding it can, each with a stable code and a
//! suggested fix. It never touches the engine at run time.
//!
//! Errors (`E*`) describe configs that cannot be built or cannot complete.
//! Warnings (`W*`) describe configs that build but are probably wrong.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use waypoint_core::config::{ActionSpec, WorkflowConfig};
use waypoint_core::graph::StateGraph;
use waypoint_engine::condition::Expression;
use waypoint_engine::registry::Registry;

pub mod codes {
    pub const DUPLICATE_STATE: &str = "E001";
    pub const MISSING_INITIAL: &str = "E002";
    pub const MISSING_FINAL: &str = "E003";
    pub const MISSING_ENDPOINT: &str = "E004";
    pub const EMPTY_ACTION_STATE: &str = "E005";
    pub const UNREACHABLE: &str = "E006";
    pub const UNKNOWN_ERROR_TARGET: &str = "E007";
    pub const INVALID_CONDITION: &str = "E008";

    pub const DEAD_END: &str = "W001";
    pub const DUPLICATE_TRANSITION: &str = "W002";
    pub const CYCLE_WITHOUT_EXIT: &str = "W003";
    pub const NAMING: &str = "W004";
    pub const LEAVES_FINAL: &str = "W005";
    pub const UNKNOWN_TYPE: &str = "W006";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    /// The state the finding is about, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub suggestion: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        write!(f, "\n  help: {}", self.suggestion)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    pub findings: Vec<Finding>,
}

impl LintReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings carrying `code`.
    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.code == code)
    }

    fn push(
        &mut self,
        code: &'static str,
        severity: Severity,
        state: Option<&str>,
        message: String,
        suggestion: String,
    ) {
        self.findings.push(Finding {
            code,
            severity,
            message,
            state: state.map(str::to_string),
            suggestion,
        });
    }

    fn error(&mut self, code: &'static str, state: Option<&str>, message: String, suggestion: String) {
        self.push(code, Severity::Error, state, message, suggestion);
    }

    fn warn(&mut self, code: &'static str, state: Option<&str>, message: String, suggestion: String) {
        self.push(code, Severity::Warning, state, message, suggestion);
    }
}

fn snake_case() -> &'static Regex {
    static SNAKE: OnceLock<Regex> = OnceLock::new();
    SNAKE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$").unwrap())
}

/// Lint `config`. With a registry, action and state kinds are checked too.
pub fn lint(config: &WorkflowConfig, registry: Option<&Registry>) -> LintReport {
    let mut report = LintReport::default();
    let names: HashSet<&str> = config.states.iter().map(|s| s.name.as_str()).collect();
    let finals: HashSet<&str> = config
        .final_states
        .iter()
        .map(String::as_str)
        .chain(config.states.iter().filter(|s| s.is_final()).map(|s| s.name.as_str()))
        .collect();

    check_names(config, &mut report);
    check_endpoints(config, &names, &finals, &mut report);
    check_states(config, &names, registry, &mut report);
    check_transitions(config, &finals, &mut report);
    if names.contains(config.initial_state.as_str()) {
        check_graph(config, &finals, &mut report);
    }

    report
}

fn check_names(config: &WorkflowConfig, report: &mut LintReport) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for state in &config.states {
        *seen.entry(state.name.as_str()).or_default() += 1;
    }
    let mut duplicates = HashSet::new();
    let mut misnamed = HashSet::new();
    for state in &config.states {
        let name = state.name.as_str();
        if seen[name] > 1 && duplicates.insert(name) {
            report.error(
                codes::DUPLICATE_STATE,
                Some(name),
                format!("state '{}' is declared {} times", name, seen[name]),
                "rename or remove the duplicate declarations".to_string(),
            );
        }
        if !snake_case().is_match(name) && misnamed.insert(name) {
            report.warn(
                codes::NAMING,
                Some(name),
                format!("state '{}' is not snake_case", name),
                format!("rename it to '{}'", to_snake_case(name)),
            );
        }
    }
}

fn check_endpoints(
    config: &WorkflowConfig,
    names: &HashSet<&str>,
    finals: &HashSet<&str>,
    report: &mut LintReport,
) {
    if config.initial_state.trim().is_empty() {
        report.error(
            codes::MISSING_INITIAL,
            None,
            "no initial state declared".to_string(),
            "set initial_state to the state the workflow starts in".to_string(),
        );
    } else if !names.contains(config.initial_state.as_str()) {
        report.error(
            codes::MISSING_INITIAL,
            Some(&config.initial_state),
            format!("initial state '{}' does not exist", config.initial_state),
            format!("declare a state named '{}' or fix initial_state", config.initial_state),
        );
    }

    if finals.is_empty() {
        report.error(
            codes::MISSING_FINAL,
            None,
            "no final state declared".to_string(),
            "add a state with kind = \"final\" or list one in final_states".to_string(),
        );
    }
    for name in &config.final_states {
        if !names.contains(name.as_str()) {
            report.error(
                codes::MISSING_FINAL,
                Some(name),
                format!("final state '{}' does not exist", name),
                format!("declare a state named '{}' with kind = \"final\"", name),
            );
        }
    }

    for t in &config.transitions {
        for endpoint in [&t.from, &t.to] {
            if !names.contains(endpoint.as_str()) {
                report.error(
                    codes::MISSING_ENDPOINT,
                    Some(endpoint),
                    format!("transition {} -> {} references unknown state '{}'", t.from, t.to, endpoint),
                    closest(endpoint, names)
                        .map(|c| format!("did you mean '{}'?", c))
                        .unwrap_or_else(|| format!("declare a state named '{}'", endpoint)),
                );
            }
        }
    }
}

fn check_states(
    config: &WorkflowConfig,
    names: &HashSet<&str>,
    registry: Option<&Registry>,
    report: &mut LintReport,
) {
    for state in &config.states {
        let name = state.name.as_str();
        if state.kind == "action" && state.actions.is_empty() {
            report.error(
                codes::EMPTY_ACTION_STATE,
                Some(name),
                format!("action state '{}' declares no actions", name),
                "add an action (use type = \"noop\" for a placeholder)".to_string(),
            );
        }
        if let Some(target) = &state.on_error {
            if !names.contains(target.as_str()) {
                report.error(
                    codes::UNKNOWN_ERROR_TARGET,
                    Some(name),
                    format!("error target '{}' of state '{}' does not exist", target, name),
                    closest(target, names)
                        .map(|c| format!("did you mean '{}'?", c))
                        .unwrap_or_else(|| "point on_error at an existing state".to_string()),
                );
            }
        }

        let Some(registry) = registry else {
            continue;
        };
        if !registry.has_state(&state.kind) {
            report.warn(
                codes::UNKNOWN_TYPE,
                Some(name),
                format!("state '{}' has unknown kind '{}'", name, state.kind),
                format!("use one of: {}", registry.state_kinds().join(", ")),
            );
        }
        let mut unknown = Vec::new();
        for action in &state.actions {
            collect_unknown_kinds(action, registry, &mut unknown);
        }
        for kind in unknown {
            report.warn(
                codes::UNKNOWN_TYPE,
                Some(name),
                format!("state '{}' uses unknown action type '{}'", name, kind),
                "register the action type or use a builtin one".to_string(),
            );
        }
    }
}

/// Walk an action spec and its nested specs, collecting unregistered kinds.
fn collect_unknown_kinds(spec: &ActionSpec, registry: &Registry, out: &mut Vec<String>) {
    if !registry.has_action(&spec.kind) && !out.contains(&spec.kind) {
        out.push(spec.kind.clone());
    }
    let mut keys: Vec<&String> = spec.params.keys().collect();
    keys.sort_unstable();
    for key in keys {
        collect_nested(&spec.params[key], registry, out);
    }
}

fn collect_nested(value: &Value, registry: &Registry, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_nested(v, registry, out)),
        Value::Object(map) if map.get("type").is_some_and(Value::is_string) => {
            if let Ok(spec) = serde_json::from_value::<ActionSpec>(value.clone()) {
                collect_unknown_kinds(&spec, registry, out);
            }
        }
        Value::Object(map) => map.values().for_each(|v| collect_nested(v, registry, out)),
        _ => {}
    }
}

fn check_transitions(config: &WorkflowConfig, finals: &HashSet<&str>, report: &mut LintReport) {
    let mut seen = HashSet::new();
    for t in &config.transitions {
        if Expression::parse(&t.condition).is_err() {
            report.error(
                codes::INVALID_CONDITION,
                Some(&t.from),
                format!("transition {} -> {} has invalid condition '{}'", t.from, t.to, t.condition),
                "use key == value, key != value, key, !key, or always".to_string(),
            );
        }
        let key = (t.from.as_str(), t.to.as_str(), t.condition.trim());
        if !seen.insert(key) {
            report.warn(
                codes::DUPLICATE_TRANSITION,
                Some(&t.from),
                format!("transition {} -> {} is declared more than once", t.from, t.to),
                "remove the duplicate transition".to_string(),
            );
        }
        if finals.contains(t.from.as_str()) {
            report.warn(
                codes::LEAVES_FINAL,
                Some(&t.from),
                format!("transition {} -> {} leaves a final state and never fires", t.from, t.to),
                format!("remove it or make '{}' a non-final state", t.from),
            );
        }
    }
}

fn check_graph(config: &WorkflowConfig, finals: &HashSet<&str>, report: &mut LintReport) {
    let graph = StateGraph::from_config(config);
    let reachable = graph.reachable_from(&config.initial_state);

    for state in graph.unreachable_from(&config.initial_state) {
        let suggestion = format!(
            "add a transition into '{}' from a reachable state, or remove it",
            state
        );
        report.error(
            codes::UNREACHABLE,
            Some(&state),
            format!("state '{}' is unreachable from initial state '{}'", state, config.initial_state),
            suggestion,
        );
    }

    let final_names: Vec<String> = finals.iter().map(|s| s.to_string()).collect();
    let exits = graph.can_reach(final_names.iter());
    for name in graph.states() {
        if finals.contains(name.as_str()) {
            continue;
        }
        if graph.successors(name).is_empty() {
            report.warn(
                codes::DEAD_END,
                Some(name),
                format!("non-final state '{}' has no outgoing transitions", name),
                format!("add a transition out of '{}' or make it final", name),
            );
        } else if reachable.contains(name) && !exits.contains(name) && graph.on_cycle(name) {
            report.warn(
                codes::CYCLE_WITHOUT_EXIT,
                Some(name),
                format!("state '{}' is on a cycle that never reaches a final state", name),
                "add a conditional transition from the cycle to a final state".to_string(),
            );
        }
    }
}

/// Closest existing name by edit distance, if reasonably close.
fn closest<'a>(target: &str, names: &HashSet<&'a str>) -> Option<&'a str> {
    let mut candidates: Vec<&'a str> = names.iter().copied().collect();
    candidates.sort_unstable();
    candidates
        .into_iter()
        .map(|n| (levenshtein(target, n), n))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, n)| n)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row.push((prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1));
        }
        prev = row;
    }
    prev[b.len()]
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::config::{StateSpec, TransitionSpec};
    use waypoint_test_utils::fixtures;

    fn codes_of(report: &LintReport) -> Vec<&'static str> {
        report.findings.iter().map(|f| f.code).collect()
    }

    #[test]
    fn test_clean_config() {
        let report = lint(&fixtures::linear_config(), Some(&Registry::with_builtins()));
        assert!(report.is_clean(), "unexpected findings: {:?}", report.findings);
    }

    #[test]
    fn test_unreachable_state_detected_and_fixed() {
        let config = fixtures::linear_config()
            .with_state(StateSpec::new("orphan", "action").with_action(ActionSpec::new("noop")))
            .with_transition(TransitionSpec::always("orphan", "c"));
        let report = lint(&config, None);
        let unreachable: Vec<_> = report.with_code(codes::UNREACHABLE).collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].state.as_deref(), Some("orphan"));
        assert!(report.has_errors());

        let fixed = config.with_transition(TransitionSpec::when("a", "orphan", "data.detour"));
        let report = lint(&fixed, None);
        assert_eq!(report.with_code(codes::UNREACHABLE).count(), 0);
    }

    #[test]
    fn test_structural_errors() {
        let mut config = fixtures::linear_config()
            .with_state(StateSpec::new("a", "action").with_action(ActionSpec::new("noop")))
            .with_state(StateSpec::new("empty", "action"))
            .with_transition(TransitionSpec::always("b", "cc"));
        config.initial_state = "start".into();
        config.states[1].on_error = Some("ghost".into());

        let codes = codes_of(&lint(&config, None));
        for code in [
            codes::DUPLICATE_STATE,
            codes::MISSING_INITIAL,
            codes::MISSING_ENDPOINT,
            codes::EMPTY_ACTION_STATE,
            codes::UNKNOWN_ERROR_TARGET,
        ] {
            assert!(codes.contains(&code), "missing {} in {:?}", code, codes);
        }
        // Graph checks need a valid initial state.
        assert!(!codes.contains(&codes::UNREACHABLE));
    }

    #[test]
    fn test_endpoint_suggestion() {
        let config = fixtures::linear_config().with_transition(TransitionSpec::always("b", "cc"));
        let report = lint(&config, None);
        let finding = report.with_code(codes::MISSING_ENDPOINT).next().unwrap();
        assert_eq!(finding.suggestion, "did you mean 'c'?");
    }

    #[test]
    fn test_missing_final() {
        let config = WorkflowConfig::new("nofinal", "a")
            .with_state(StateSpec::new("a", "action").with_action(ActionSpec::new("noop")));
        let report = lint(&config, None);
        assert!(codes_of(&report).contains(&codes::MISSING_FINAL));
        assert!(codes_of(&report).contains(&codes::DEAD_END));
    }

    #[test]
    fn test_cycle_without_exit() {
        let config = fixtures::linear_config()
            .with_state(StateSpec::new("x", "action").with_action(ActionSpec::new("noop")))
            .with_state(StateSpec::new("y", "action").with_action(ActionSpec::new("noop")))
            .with_transition(TransitionSpec::when("a", "x", "data.loop"))
            .with_transition(TransitionSpec::always("x", "y"))
            .with_transition(TransitionSpec::always("y", "x"));
        let report = lint(&config, None);
        let states: Vec<_> = report
            .with_code(codes::CYCLE_WITHOUT_EXIT)
            .filter_map(|f| f.state.as_deref())
            .collect();
        assert_eq!(states, vec!["x", "y"]);
    }

    #[test]
    fn test_warnings() {
        let config = fixtures::linear_config()
            .with_state(StateSpec::new("FetchData", "action").with_action(ActionSpec::new("teleport")))
            .with_transition(TransitionSpec::always("a", "FetchData"))
            .with_transition(TransitionSpec::always("FetchData", "c"))
            .with_transition(TransitionSpec::always("a", "b"))
            .with_transition(TransitionSpec::always("c", "a"));
        let report = lint(&config, Some(&Registry::with_builtins()));
        let codes = codes_of(&report);

        assert!(codes.contains(&codes::DUPLICATE_TRANSITION));
        assert!(codes.contains(&codes::LEAVES_FINAL));
        assert!(codes.contains(&codes::UNKNOWN_TYPE));
        let naming = report.with_code(codes::NAMING).next().unwrap();
        assert_eq!(naming.suggestion, "rename it to 'fetch_data'");
        assert!(!report.has_errors());
    }

    #[test]
    fn test_nested_unknown_type() {
        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "try_with_fallback",
            "params": {
                "primary": {"type": "http_get"},
                "fallback": {"type": "sequence", "params": {"actions": [{"type": "noop"}, {"type": "cache_read"}]}}
            }
        }))
        .unwrap();
        let mut unknown = Vec::new();
        collect_unknown_kinds(&spec, &Registry::with_builtins(), &mut unknown);
        assert_eq!(unknown, vec!["cache_read".to_string(), "http_get".to_string()]);
    }

    #[test]
    fn test_invalid_condition() {
        let config = fixtures::linear_config()
            .with_transition(TransitionSpec::when("a", "c", "a and b"));
        let report = lint(&config, None);
        assert_eq!(report.with_code(codes::INVALID_CONDITION).count(), 1);
    }

    #[test]
    fn test_finding_display() {
        let finding = Finding {
            code: codes::DEAD_END,
            severity: Severity::Warning,
            message: "non-final state 'x' has no outgoing transitions".into(),
            state: Some("x".into()),
            suggestion: "add a transition out of 'x' or make it final".into(),
        };
        assert_eq!(
            finding.to_string(),
            "warning[W001]: non-final state 'x' has no outgoing transitions\n  help: add a transition out of 'x' or make it final"
        );
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("FetchData"), "fetch_data");
        assert_eq!(to_snake_case("fetch-data"), "fetch_data");
        assert_eq!(to_snake_case("HTTPCall2"), "httpcall2");
    }
}
