use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointError {
    // Graph errors
    #[error("State not found: {0}")]
    StateNotFound(String),

    #[error("No transition matched from state: {from}")]
    TransitionNotFound { from: String },

    #[error("Transition {from} -> {to} failed: {source}")]
    Transition {
        from: String,
        to: String,
        #[source]
        source: Box<WaypointError>,
    },

    #[error("State {state} failed: {source}")]
    State {
        state: String,
        #[source]
        source: Box<WaypointError>,
    },

    // Run control
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Step limit of {limit} reached in state: {state}")]
    StepLimitExceeded { state: String, limit: usize },

    // Config errors
    #[error("Config validation failed ({kind}): {message}")]
    ConfigValidation {
        kind: ConfigErrorKind,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Unknown {category} type: {kind}")]
    UnknownType { category: String, kind: String },

    #[error("Parameter {name}: {kind}")]
    Parameter { name: String, kind: ParamErrorKind },

    #[error("Invalid condition expression: {0}")]
    Expression(String),

    // Action errors
    #[error("Action {action} failed: {source}")]
    Action {
        action: String,
        #[source]
        source: Box<WaypointError>,
    },

    #[error("{0}")]
    ActionFailed(String),

    #[error("Permanent error: {0}")]
    Permanent(#[source] Box<WaypointError>),

    #[error("Action {action} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        action: String,
        attempts: u32,
        #[source]
        source: Box<WaypointError>,
    },

    #[error(transparent)]
    Aggregate(AggregateError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Subkind of a structural config violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    UniqueName,
    MissingEndpoint,
    MissingField,
    InvalidValue,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UniqueName => "unique-name",
            Self::MissingEndpoint => "missing-endpoint",
            Self::MissingField => "missing-required-field",
            Self::InvalidValue => "invalid-value",
        };
        f.write_str(s)
    }
}

/// Why a typed parameter lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamErrorKind {
    Missing,
    TypeMismatch { expected: &'static str },
}

impl fmt::Display for ParamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("parameter not found"),
            Self::TypeMismatch { expected } => write!(f, "type mismatch, expected {}", expected),
        }
    }
}

/// Several failures reported together.
///
/// Produced by parallel composition and by try-with-fallback when both sides fail.
/// The first member is exposed as the `source`; [`WaypointError::any_cause`]
/// searches every member.
#[derive(Debug)]
pub struct AggregateError {
    pub context: String,
    pub errors: Vec<WaypointError>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} error(s): ", self.context, self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl WaypointError {
    /// Opaque failure from a leaf action.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ActionFailed(message.into())
    }

    /// Mark an error as non-retryable.
    pub fn permanent(inner: WaypointError) -> Self {
        Self::Permanent(Box::new(inner))
    }

    pub fn in_action(action: impl Into<String>, source: WaypointError) -> Self {
        Self::Action {
            action: action.into(),
            source: Box::new(source),
        }
    }

    pub fn in_state(state: impl Into<String>, source: WaypointError) -> Self {
        Self::State {
            state: state.into(),
            source: Box::new(source),
        }
    }

    pub fn validation(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            kind,
            message: message.into(),
        }
    }

    pub fn aggregate(context: impl Into<String>, errors: Vec<WaypointError>) -> Self {
        Self::Aggregate(AggregateError {
            context: context.into(),
            errors,
        })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Whether this error is a cancellation or deadline signal, at any depth.
    pub fn is_interrupt(&self) -> bool {
        self.any_cause(|e| matches!(e, Self::Cancelled(_) | Self::DeadlineExceeded(_)))
    }

    /// Direct wrapped causes of this error (every member for aggregates).
    pub fn causes(&self) -> Vec<&WaypointError> {
        match self {
            Self::Transition { source, .. }
            | Self::State { source, .. }
            | Self::Action { source, .. }
            | Self::RetryExhausted { source, .. }
            | Self::Permanent(source) => vec![source.as_ref()],
            Self::Aggregate(agg) => agg.errors.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// True if `pred` holds for this error or any error it wraps.
    pub fn any_cause(&self, pred: impl Fn(&WaypointError) -> bool + Copy) -> bool {
        if pred(self) {
            return true;
        }
        self.causes().into_iter().any(|c| c.any_cause(pred))
    }

    /// Innermost cause along the first wrapped chain.
    pub fn root_cause(&self) -> &WaypointError {
        match self.causes().first() {
            Some(inner) => inner.root_cause(),
            None => self,
        }
    }
}

pub type Result<T> = std::result::Result<T, WaypointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_display() {
        let err = WaypointError::in_state("collect", WaypointError::failed("boom"));
        assert_eq!(err.to_string(), "State collect failed: boom");
        assert!(matches!(err.root_cause(), WaypointError::ActionFailed(m) if m == "boom"));
    }

    #[test]
    fn test_aggregate_any_cause() {
        let err = WaypointError::aggregate(
            "fanout",
            vec![
                WaypointError::failed("first"),
                WaypointError::Cancelled("branch".into()),
            ],
        );
        assert!(err.any_cause(|e| matches!(e, WaypointError::Cancelled(_))));
        assert!(err.is_interrupt());
        assert!(err.to_string().contains("first"));
        assert!(err.to_string().contains("2 error(s)"));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;
        let err = WaypointError::in_action(
            "outer",
            WaypointError::permanent(WaypointError::failed("bad input")),
        );
        let source = err.source().expect("has source");
        assert_eq!(source.to_string(), "Permanent error: bad input");
    }

    #[test]
    fn test_config_kind_display() {
        let err = WaypointError::validation(ConfigErrorKind::UniqueName, "duplicate state: a");
        assert_eq!(
            err.to_string(),
            "Config validation failed (unique-name): duplicate state: a"
        );
    }
}
