use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigErrorKind, Result, WaypointError};

/// Literal condition that always matches.
pub const ALWAYS: &str = "always";

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    pub initial_state: String,
    #[serde(default)]
    pub final_states: Vec<String>,
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub states: Vec<StateSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
}

/// Engine-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Check the run's cancellation token before each state (default: true).
    #[serde(default = "default_cancellation")]
    pub cancellation: bool,
    /// Default per-state timeout for states without their own (0 = unbounded).
    #[serde(default)]
    pub action_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cancellation: default_cancellation(),
            action_timeout_secs: 0,
        }
    }
}

fn default_cancellation() -> bool { true }

/// One state in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    /// `action`, `conditional`, `final`, or any registered kind.
    #[serde(default = "default_state_kind")]
    pub kind: String,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// State to continue at when this one fails.
    #[serde(default)]
    pub on_error: Option<String>,
    /// Per-state timeout in seconds (0 = unbounded).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_state_kind() -> String { "action".to_string() }

impl StateSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            actions: vec![],
            on_error: None,
            timeout_secs: None,
            params: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_on_error(mut self, target: impl Into<String>) -> Self {
        self.on_error = Some(target.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn is_final(&self) -> bool {
        self.kind == "final"
    }
}

/// A unit of work inside a state. Composite kinds nest further specs in `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl ActionSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            params: HashMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Explicit name, or the kind when none was given.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

/// A guarded edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    /// Condition expression, or `"always"`.
    #[serde(default = "default_condition")]
    pub condition: String,
    /// Accepted for compatibility; resolution order is registration order.
    #[serde(default)]
    pub priority: i32,
}

fn default_condition() -> String { ALWAYS.to_string() }

impl TransitionSpec {
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: default_condition(),
            priority: 0,
        }
    }

    pub fn when(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: condition.into(),
            priority: 0,
        }
    }
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>, initial_state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: initial_state.into(),
            final_states: vec![],
            settings: EngineSettings::default(),
            states: vec![],
            transitions: vec![],
        }
    }

    pub fn with_state(mut self, state: StateSpec) -> Self {
        if state.is_final() && !self.final_states.contains(&state.name) {
            self.final_states.push(state.name.clone());
        }
        self.states.push(state);
        self
    }

    pub fn with_transition(mut self, transition: TransitionSpec) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Load a workflow from a TOML file, expanding `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WaypointError::ConfigNotFound(source.clone()),
            _ => WaypointError::Config(format!("{}: {}", source, e)),
        })?;
        Self::parse(&content, &source)
    }

    /// Parse a workflow from TOML text, expanding `${ENV_VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::parse(content, "<inline>")
    }

    fn parse(content: &str, source: &str) -> Result<Self> {
        let expanded = expand_env_vars(content, source)?;
        toml::from_str(&expanded).map_err(|e| WaypointError::Config(format!("{}: {}", source, e)))
    }

    pub fn state(&self, name: &str) -> Option<&StateSpec> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn is_final(&self, name: &str) -> bool {
        self.final_states.iter().any(|f| f == name)
    }

    /// Enforce the structural invariants required before an engine is built.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WaypointError::validation(
                ConfigErrorKind::MissingField,
                "workflow name is required",
            ));
        }
        if self.initial_state.trim().is_empty() {
            return Err(WaypointError::validation(
                ConfigErrorKind::MissingField,
                "initial_state is required",
            ));
        }

        let mut names = HashSet::new();
        for state in &self.states {
            if state.name.trim().is_empty() {
                return Err(WaypointError::validation(
                    ConfigErrorKind::MissingField,
                    "state name is required",
                ));
            }
            if !names.insert(state.name.as_str()) {
                return Err(WaypointError::validation(
                    ConfigErrorKind::UniqueName,
                    format!("duplicate state: {}", state.name),
                ));
            }
        }

        if !names.contains(self.initial_state.as_str()) {
            return Err(WaypointError::validation(
                ConfigErrorKind::MissingEndpoint,
                format!("initial state does not exist: {}", self.initial_state),
            ));
        }
        for f in &self.final_states {
            if !names.contains(f.as_str()) {
                return Err(WaypointError::validation(
                    ConfigErrorKind::MissingEndpoint,
                    format!("final state does not exist: {}", f),
                ));
            }
        }

        for t in &self.transitions {
            for endpoint in [&t.from, &t.to] {
                if !names.contains(endpoint.as_str()) {
                    return Err(WaypointError::validation(
                        ConfigErrorKind::MissingEndpoint,
                        format!(
                            "transition {} -> {} references unknown state: {}",
                            t.from, t.to, endpoint
                        ),
                    ));
                }
            }
        }

        for state in &self.states {
            if state.kind == "action" && state.actions.is_empty() {
                return Err(WaypointError::validation(
                    ConfigErrorKind::MissingField,
                    format!("action state declares no actions: {}", state.name),
                ));
            }
            if let Some(target) = &state.on_error {
                if !names.contains(target.as_str()) {
                    return Err(WaypointError::validation(
                        ConfigErrorKind::MissingEndpoint,
                        format!("error target of {} does not exist: {}", state.name, target),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn env_reference() -> &'static Regex {
    static ENV_REF: OnceLock<Regex> = OnceLock::new();
    ENV_REF.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap())
}

/// Substitute `${VAR}` and `${VAR:-fallback}` references in workflow text.
///
/// A reference to an unset variable without a fallback is an error naming
/// every such variable and the `source` it appeared in.
fn expand_env_vars(input: &str, source: &str) -> Result<String> {
    let mut unset: Vec<String> = Vec::new();
    let expanded = env_reference().replace_all(input, |caps: &Captures<'_>| {
        let var = &caps[1];
        match (std::env::var(var), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                if !unset.iter().any(|u| u == var) {
                    unset.push(var.to_string());
                }
                String::new()
            }
        }
    });
    if !unset.is_empty() {
        return Err(WaypointError::Config(format!(
            "{}: unset environment variable(s): {}",
            source,
            unset.join(", ")
        )));
    }
    Ok(expanded.into_owned())
}
