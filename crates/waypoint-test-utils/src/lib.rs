//! Shared test doubles for Waypoint crates.

pub mod fixtures;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::hooks::{ExecutionHook, HookEvent};
use waypoint_engine::action::Action;

/// Fails the first `failures` attempts, then succeeds.
///
/// On success sets `{name}_executed = true`. Errors can be made permanent.
pub struct ScriptedAction {
    name: String,
    failures: u32,
    permanent: bool,
    attempts: AtomicU32,
}

impl ScriptedAction {
    pub fn new(name: impl Into<String>, failures: u32) -> Self {
        Self {
            name: name.into(),
            failures,
            permanent: false,
            attempts: AtomicU32::new(0),
        }
    }

    /// Never succeeds.
    pub fn always_failing(name: impl Into<String>) -> Self {
        Self::new(name, u32::MAX)
    }

    /// Fail with permanent errors.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Action for ScriptedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                let err = WaypointError::failed(format!("{} attempt {} failed", self.name, attempt));
                return Err(if self.permanent {
                    WaypointError::permanent(err)
                } else {
                    err
                });
            }
            ctx.set(format!("{}_executed", self.name), true);
            Ok(())
        })
    }
}

/// Succeeds every time and counts how often it ran.
pub struct CountingAction {
    name: String,
    calls: AtomicU32,
}

impl CountingAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Action for CountingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Sets `{name}_executed = true`, plus any extra key/value pairs.
pub struct MarkerAction {
    name: String,
    extra: Vec<(String, serde_json::Value)>,
}

impl MarkerAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }
}

impl Action for MarkerAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            ctx.set(format!("{}_executed", self.name), true);
            for (k, v) in &self.extra {
                ctx.set(k.clone(), v.clone());
            }
            Ok(())
        })
    }
}

/// Records every hook event as `state:action:phase` (`:error` appended on failure).
#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ExecutionHook for RecordingHook {
    fn on_event(&self, event: &HookEvent<'_>) {
        let mut line = format!("{}:{}:{}", event.state, event.action, event.phase);
        if let Some(error) = event.error {
            line.push(':');
            line.push_str(error);
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(line);
        }
    }
}
