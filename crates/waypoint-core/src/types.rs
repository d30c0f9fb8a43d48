use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of executing a state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    /// Preferred next state. Empty means "let the transitions decide".
    #[serde(default)]
    pub next_state: String,
    /// Delta merged into the context when the transition is taken.
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// The run ends in `next_state` regardless of registered transitions.
    #[serde(default)]
    pub complete: bool,
}

impl TransitionResult {
    /// Defer to the registered transitions.
    pub fn proceed() -> Self {
        Self::default()
    }

    /// Prefer a specific next state.
    pub fn to(next_state: impl Into<String>) -> Self {
        Self {
            next_state: next_state.into(),
            ..Default::default()
        }
    }

    /// End the run in `state`.
    pub fn complete(state: impl Into<String>) -> Self {
        Self {
            next_state: state.into(),
            data: HashMap::new(),
            complete: true,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Phase of an execution hook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Start,
    End,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::End => f.write_str("end"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let r = TransitionResult::proceed();
        assert!(r.next_state.is_empty());
        assert!(!r.complete);

        let r = TransitionResult::to("review").with_data("score", 7);
        assert_eq!(r.next_state, "review");
        assert_eq!(r.data.get("score"), Some(&serde_json::json!(7)));

        let r = TransitionResult::complete("done");
        assert!(r.complete);
        assert_eq!(r.next_state, "done");
    }
}
