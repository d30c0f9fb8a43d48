use std::fmt;
use std::sync::Arc;

use waypoint_core::context::ExecutionContext;
use waypoint_core::error::Result;

use crate::action::PredicateRef;
use crate::condition::Expression;

/// A predicate-guarded edge between two states.
#[derive(Clone)]
pub struct Transition {
    pub from: String,
    pub to: String,
    predicate: Option<PredicateRef>,
    label: String,
}

impl Transition {
    /// Unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            predicate: None,
            label: "always".to_string(),
        }
    }

    /// Edge guarded by an arbitrary predicate.
    pub fn when(from: impl Into<String>, to: impl Into<String>, predicate: PredicateRef) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            predicate: Some(predicate),
            label: "custom".to_string(),
        }
    }

    /// Edge guarded by a condition expression such as `data.status == "ok"`.
    pub fn expression(from: impl Into<String>, to: impl Into<String>, expr: &str) -> Result<Self> {
        let parsed = Expression::parse(expr)?;
        let label = parsed.to_string();
        let predicate: Option<PredicateRef> = match parsed {
            Expression::Always => None,
            other => Some(Arc::new(other)),
        };
        Ok(Self {
            from: from.into(),
            to: to.into(),
            predicate,
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_unconditional(&self) -> bool {
        self.predicate.is_none()
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        match &self.predicate {
            Some(predicate) => predicate.evaluate(ctx),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.label)
            .finish()
    }
}
