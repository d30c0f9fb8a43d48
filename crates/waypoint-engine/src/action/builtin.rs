//! Leaf actions shipped with the engine.

use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;
use waypoint_core::retry::wait;

use super::Action;

/// Does nothing. Useful as a placeholder in config-built workflows.
pub struct Noop {
    name: String,
}

impl Noop {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_spec(spec: &ActionSpec) -> Self {
        Self::new(spec.name())
    }
}

impl Action for Noop {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Writes a fixed value under a key.
pub struct SetValue {
    name: String,
    key: String,
    value: Value,
}

impl SetValue {
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn from_spec(spec: &ActionSpec) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        Ok(Self::new(
            spec.name(),
            p.required_str("key")?,
            p.required_value("value")?.clone(),
        ))
    }
}

impl Action for SetValue {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            ctx.set(self.key.clone(), self.value.clone());
            Ok(())
        })
    }
}

/// Copies the value at `from` to `to`. Fails when `from` is absent.
pub struct CopyValue {
    name: String,
    from: String,
    to: String,
}

impl CopyValue {
    pub fn new(name: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn from_spec(spec: &ActionSpec) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        Ok(Self::new(spec.name(), p.required_str("from")?, p.required_str("to")?))
    }
}

impl Action for CopyValue {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let value = ctx
                .get(&self.from)
                .ok_or_else(|| WaypointError::failed(format!("key not found: {}", self.from)))?;
            ctx.set(self.to.clone(), value);
            Ok(())
        })
    }
}

/// Always fails, optionally with a permanent (non-retryable) error.
pub struct Fail {
    name: String,
    message: String,
    permanent: bool,
}

impl Fail {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn from_spec(spec: &ActionSpec) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let message = p.optional_str("message")?.unwrap_or("action failed");
        let mut fail = Self::new(spec.name(), message);
        fail.permanent = p.optional_bool("permanent")?.unwrap_or(false);
        Ok(fail)
    }
}

impl Action for Fail {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let err = WaypointError::failed(self.message.clone());
            if self.permanent {
                Err(WaypointError::permanent(err))
            } else {
                Err(err)
            }
        })
    }
}

/// Sleeps for a fixed duration. Cancellable through the context's token.
pub struct Delay {
    name: String,
    duration: Duration,
}

impl Delay {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }

    pub fn from_spec(spec: &ActionSpec) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let duration = p.optional_duration("duration")?.unwrap_or_default();
        Ok(Self::new(spec.name(), duration))
    }
}

impl Action for Delay {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let token = ctx.cancellation_token();
            wait(self.duration, Some(&token), None).await
        })
    }
}

/// Emits an info-level event. `{key}` placeholders are filled from the context.
pub struct Log {
    name: String,
    message: String,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").unwrap())
}

impl Log {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn from_spec(spec: &ActionSpec) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        Ok(Self::new(spec.name(), p.required_str("message")?))
    }

    /// Render the message against the context. Unknown keys render empty.
    pub fn render(&self, ctx: &ExecutionContext) -> String {
        placeholder()
            .replace_all(&self.message, |caps: &regex::Captures<'_>| match ctx.get(&caps[1]) {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .into_owned()
    }
}

impl Action for Log {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let message = self.render(ctx);
            info!(action = %self.name, state = %ctx.current_state(), "{}", message);
            Ok(())
        })
    }
}

/// Adapts a synchronous closure into an action.
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { (self.f)(ctx) })
    }
}
