use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use waypoint_core::config::ActionSpec;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::params::Params;
use waypoint_core::retry::{
    Backoff, ExponentialBackoff, Jitter, RetryEvent, RetryFailure, RetryPolicy, RetryRunner, RetryStop,
};

pub use waypoint_core::retry::RetryClassifier;

use super::{record, Action, ActionRef};
use crate::registry::Registry;

/// Runs `action` under `runner`, recording `{name}_attempts` before each try.
async fn run_recorded<R>(
    name: &str,
    action: &ActionRef,
    runner: RetryRunner,
    ctx: &ExecutionContext,
    on_retry: R,
) -> Result<()>
where
    R: FnMut(&RetryEvent<'_>),
{
    let runner = runner.with_label(name).with_cancellation(ctx.cancellation_token());
    runner
        .run_with(
            |attempt| {
                record(ctx, name, "attempts", attempt);
                action.execute(ctx)
            },
            on_retry,
        )
        .await
        .map_err(|failure| into_action_error(name, failure))
}

fn into_action_error(name: &str, failure: RetryFailure) -> WaypointError {
    match failure.reason {
        RetryStop::Exhausted => WaypointError::RetryExhausted {
            action: name.to_string(),
            attempts: failure.attempts,
            source: Box::new(failure.error),
        },
        RetryStop::Permanent | RetryStop::Rejected | RetryStop::Interrupted => {
            WaypointError::in_action(name, failure.error)
        }
    }
}

/// Re-runs an action up to `max_retries` times with linear backoff
/// (`backoff * attempt`) between attempts.
pub struct Retry {
    name: String,
    action: ActionRef,
    policy: RetryPolicy,
}

impl Retry {
    pub fn new(name: impl Into<String>, action: ActionRef, max_retries: u32, backoff: Duration) -> Self {
        Self {
            name: name.into(),
            action,
            policy: RetryPolicy::default()
                .with_max_attempts(max_retries)
                .with_backoff(Backoff::Linear(backoff)),
        }
    }

    /// Params: `action`, `max_retries` (default 3), `backoff` (default 1s).
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        Ok(Self::new(
            spec.name(),
            registry.build_action(&p.required_action("action")?)?,
            p.optional_u32("max_retries")?.unwrap_or(3),
            p.optional_duration("backoff")?.unwrap_or(Duration::from_secs(1)),
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Action for Retry {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(run_recorded(
            &self.name,
            &self.action,
            RetryRunner::new(self.policy),
            ctx,
            |_| {},
        ))
    }
}

/// Re-runs an action with exponential backoff and optional jitter.
///
/// Records `{name}_attempts` and `{name}_delays_ms`. An error is not retried
/// when any cause is [`WaypointError::Permanent`] or the classifier rejects it.
pub struct RetryWithBackoff {
    name: String,
    action: ActionRef,
    policy: RetryPolicy,
    classifier: Option<RetryClassifier>,
}

impl RetryWithBackoff {
    pub fn new(name: impl Into<String>, action: ActionRef, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            action,
            policy,
            classifier: None,
        }
    }

    /// Only errors for which `retryable` returns true are retried.
    pub fn with_classifier<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&WaypointError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(retryable));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Params: `action`, `max_attempts`, `base_delay`, `factor`, `max_delay`,
    /// `jitter` (spread in 0..=1), `attempt_timeout`, `non_retryable`
    /// (message substrings that stop retrying).
    pub fn from_spec(spec: &ActionSpec, registry: &Registry) -> Result<Self> {
        let p = Params::new(spec.name(), &spec.params);
        let defaults = ExponentialBackoff::default();
        let mut policy = RetryPolicy::default().with_backoff(ExponentialBackoff::new(
            p.optional_duration("base_delay")?.unwrap_or(defaults.base),
            p.optional_f64("factor")?.unwrap_or(defaults.factor),
            p.optional_duration("max_delay")?.unwrap_or(defaults.max),
        ));
        if let Some(max_attempts) = p.optional_u32("max_attempts")? {
            policy = policy.with_max_attempts(max_attempts);
        }
        if let Some(spread) = p.optional_f64("jitter")? {
            policy = policy.with_jitter(Jitter::Proportional { spread });
        }
        if let Some(timeout) = p.optional_duration("attempt_timeout")? {
            policy = policy.with_attempt_timeout(timeout);
        }

        let mut action = Self::new(
            spec.name(),
            registry.build_action(&p.required_action("action")?)?,
            policy,
        );
        if let Some(patterns) = p.optional_str_list("non_retryable")? {
            action = action.with_classifier(move |err| {
                let message = err.to_string();
                !patterns.iter().any(|pattern| message.contains(pattern.as_str()))
            });
        }
        Ok(action)
    }
}

impl Action for RetryWithBackoff {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut runner = RetryRunner::new(self.policy);
            if let Some(classifier) = &self.classifier {
                runner = runner.with_classifier(classifier.clone());
            }
            let mut delays: Vec<Value> = Vec::new();
            run_recorded(&self.name, &self.action, runner, ctx, |event| {
                delays.push(Value::from(event.delay.as_millis() as u64));
                record(ctx, &self.name, "delays_ms", delays.clone());
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Fail, FnAction};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until the `succeed_on`-th call; 0 means never succeed.
    fn flaky(calls: Arc<AtomicU32>, succeed_on: u32) -> ActionRef {
        Arc::new(FnAction::new("flaky", move |_ctx: &ExecutionContext| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if succeed_on != 0 && n >= succeed_on {
                Ok(())
            } else {
                Err(WaypointError::failed(format!("attempt {} failed", n)))
            }
        }))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_backoff(ExponentialBackoff::new(
                Duration::from_millis(100),
                2.0,
                Duration::from_millis(250),
            ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_succeeds_on_third() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("sync", flaky(calls.clone(), 3), 5, Duration::from_millis(10));
        let ctx = ExecutionContext::new();
        retry.execute(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.get_int("sync_attempts"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("sync", flaky(calls.clone(), 0), 3, Duration::from_millis(10));
        let err = retry.execute(&ExecutionContext::new()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            WaypointError::RetryExhausted { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "attempt 3 failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_linear_backoff() {
        let start = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("sync", flaky(calls, 0), 3, Duration::from_millis(100));
        let _ = retry.execute(&ExecutionContext::new()).await;
        // 100ms after attempt 1, 200ms after attempt 2.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_records_delays() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = RetryWithBackoff::new("fetch", flaky(calls.clone(), 0), fast_policy(4));
        let ctx = ExecutionContext::new();
        let err = retry.execute(&ctx).await.unwrap_err();

        assert!(matches!(err, WaypointError::RetryExhausted { attempts: 4, .. }));
        assert_eq!(ctx.get_int("fetch_attempts"), Some(4));
        assert_eq!(ctx.get("fetch_delays_ms"), Some(serde_json::json!([100, 200, 250])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = Arc::new(FnAction::new("auth", move |_ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WaypointError::permanent(WaypointError::failed("bad credentials")))
        }));
        let retry = RetryWithBackoff::new("login", action, fast_policy(10));
        let err = retry.execute(&ExecutionContext::new()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.any_cause(WaypointError::is_permanent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_permanent_error_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let leaf = Arc::new(FnAction::new("leaf", move |_ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WaypointError::in_action(
                "leaf",
                WaypointError::permanent(WaypointError::failed("nope")),
            ))
        }));
        let retry = Retry::new("sync", leaf, 3, Duration::from_millis(10));
        let ctx = ExecutionContext::new();
        let err = retry.execute(&ctx).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.get_int("sync_attempts"), Some(1));
        assert!(err.any_cause(WaypointError::is_permanent));
        assert!(!matches!(err, WaypointError::RetryExhausted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_stops_retries() {
        let retry = RetryWithBackoff::new("fetch", Arc::new(Fail::new("f", "404 not found")), fast_policy(5))
            .with_classifier(|e| !e.to_string().contains("404"));
        let ctx = ExecutionContext::new();
        let err = retry.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Action fetch failed: 404 not found");
        assert_eq!(ctx.get_int("fetch_attempts"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = Arc::new(FnAction::new("down", move |ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.cancel();
            Err(WaypointError::failed("unavailable"))
        }));
        let retry = RetryWithBackoff::new("fetch", action, fast_policy(5));
        let err = retry.execute(&ExecutionContext::new()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_interrupt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_spec() {
        let spec: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "retry_with_backoff",
            "name": "fetch",
            "params": {
                "action": {"type": "fail", "params": {"message": "quota exceeded"}},
                "max_attempts": 4,
                "base_delay": "10ms",
                "max_delay": "1s",
                "non_retryable": ["quota"]
            }
        }))
        .unwrap();
        let retry = RetryWithBackoff::from_spec(&spec, &Registry::with_builtins()).unwrap();
        assert_eq!(retry.policy().max_attempts, 4);
        assert_eq!(retry.policy().backoff.delay(0), Duration::from_millis(10));

        let ctx = ExecutionContext::new();
        retry.execute(&ctx).await.unwrap_err();
        assert_eq!(ctx.get_int("fetch_attempts"), Some(1));
    }
}
