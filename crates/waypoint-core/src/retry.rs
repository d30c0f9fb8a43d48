//! Retry any fallible async operation with configurable backoff.
//!
//! An error that is, or wraps, [`WaypointError::Permanent`] ends the loop
//! after that attempt, as does one the optional classifier rejects. Backoff
//! sleeps race the caller's cancellation token and deadline, and whichever
//! fires first ends the loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, WaypointError};

/// Exponential backoff: `base * factor^k`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    #[serde(default = "default_base_ms", rename = "base_ms", with = "millis")]
    pub base: Duration,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_ms", rename = "max_ms", with = "millis")]
    pub max: Duration,
}

fn default_base_ms() -> Duration { Duration::from_millis(1000) }
fn default_factor() -> f64 { 2.0 }
fn default_max_ms() -> Duration { Duration::from_secs(30) }

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: default_base_ms(),
            factor: default_factor(),
            max: default_max_ms(),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max }
    }

    /// Delay before retry number `k` (0-based).
    pub fn delay(&self, k: u32) -> Duration {
        let exp = i32::try_from(k).unwrap_or(i32::MAX);
        let nanos = self.base.as_nanos() as f64 * self.factor.max(0.0).powi(exp);
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Randomisation applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Jitter {
    #[default]
    None,
    /// Scale the delay by a random factor in `[1 - spread, 1 + spread]`.
    Proportional { spread: f64 },
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Proportional { spread } => {
                let spread = spread.clamp(0.0, 1.0);
                let scale = 1.0 - spread + rand::random::<f64>() * 2.0 * spread;
                Duration::from_secs_f64(delay.as_secs_f64() * scale)
            }
        }
    }
}

/// Delay schedule between attempts.
///
/// Deserialises from either an exponential table or a plain step in
/// milliseconds for linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Backoff {
    /// `step * (k + 1)` before retry number `k`, uncapped.
    Linear(#[serde(with = "millis")] Duration),
    Exponential(ExponentialBackoff),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

impl From<ExponentialBackoff> for Backoff {
    fn from(backoff: ExponentialBackoff) -> Self {
        Self::Exponential(backoff)
    }
}

impl Backoff {
    /// Delay before retry number `k` (0-based).
    pub fn delay(&self, k: u32) -> Duration {
        match self {
            Self::Linear(step) => step.saturating_mul(k.saturating_add(1)),
            Self::Exponential(backoff) => backoff.delay(k),
        }
    }
}

/// How many times and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default)]
    pub jitter: Jitter,
    /// Bound on each individual attempt. A timed-out attempt counts as a
    /// retryable failure.
    #[serde(default, with = "opt_millis", rename = "attempt_timeout_ms")]
    pub attempt_timeout: Option<Duration>,
}

fn default_max_attempts() -> u32 { 3 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            jitter: Jitter::None,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: impl Into<Backoff>) -> Self {
        self.backoff = backoff.into();
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Jittered delay before retry number `k` (0-based).
    pub fn delay(&self, k: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(k))
    }
}

/// Decides whether an error is worth another attempt.
pub type RetryClassifier = Arc<dyn Fn(&WaypointError) -> bool + Send + Sync>;

/// True when the error, or anything it wraps, asks not to be retried.
pub fn is_permanent_failure(err: &WaypointError) -> bool {
    err.any_cause(WaypointError::is_permanent)
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// Every attempt failed.
    Exhausted,
    /// The error was marked permanent.
    Permanent,
    /// The classifier rejected the error.
    Rejected,
    /// Cancellation or the deadline ended a backoff wait.
    Interrupted,
}

/// Failed outcome of [`RetryRunner::run_with`].
#[derive(Debug)]
pub struct RetryFailure {
    pub reason: RetryStop,
    /// Attempts made before giving up.
    pub attempts: u32,
    pub error: WaypointError,
}

impl RetryFailure {
    /// The error a plain [`RetryRunner::run`] surfaces: a top-level
    /// `Permanent` is unwrapped to its cause.
    pub fn into_error(self) -> WaypointError {
        match (self.reason, self.error) {
            (RetryStop::Permanent, WaypointError::Permanent(inner)) => *inner,
            (_, error) => error,
        }
    }
}

/// A failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a WaypointError,
}

/// Runs an operation under a [`RetryPolicy`] and the caller's ambient limits.
#[derive(Clone, Default)]
pub struct RetryRunner {
    policy: RetryPolicy,
    label: Option<String>,
    classifier: Option<RetryClassifier>,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl fmt::Debug for RetryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryRunner")
            .field("policy", &self.policy)
            .field("label", &self.label)
            .field("classifier", &self.classifier.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RetryRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Name used in log events and timeout messages.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Only errors for which `classifier` returns true are retried.
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("operation")
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. After exhaustion the last
    /// error is returned.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(op, |_| {}).await.map_err(RetryFailure::into_error)
    }

    /// Like [`run`](Self::run), but reports each scheduled retry to
    /// `on_retry` and says why the loop stopped on failure.
    pub async fn run_with<T, F, Fut, R>(
        &self,
        mut op: F,
        mut on_retry: R,
    ) -> std::result::Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(&RetryEvent<'_>),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(WaypointError::DeadlineExceeded(format!(
                        "{} attempt {} exceeded {}ms",
                        self.label(),
                        attempt,
                        limit.as_millis()
                    ))),
                },
                None => op(attempt).await,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let stop = if is_permanent_failure(&error) {
                debug!(operation = %self.label(), attempt, error = %error, "Permanent error, not retrying");
                Some(RetryStop::Permanent)
            } else if self.classifier.as_ref().is_some_and(|retryable| !retryable(&error)) {
                debug!(operation = %self.label(), attempt, error = %error, "Error rejected by classifier");
                Some(RetryStop::Rejected)
            } else if attempt >= max_attempts {
                Some(RetryStop::Exhausted)
            } else {
                None
            };
            if let Some(reason) = stop {
                return Err(RetryFailure {
                    reason,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.policy.delay(attempt - 1);
            warn!(
                operation = %self.label(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying operation"
            );
            on_retry(&RetryEvent {
                attempt,
                delay,
                error: &error,
            });
            if let Err(interrupt) = wait(delay, self.cancel.as_ref(), self.deadline).await {
                return Err(RetryFailure {
                    reason: RetryStop::Interrupted,
                    attempts: attempt,
                    error: interrupt,
                });
            }
            attempt += 1;
        }
    }
}

/// Sleep for `delay` unless cancellation or the deadline comes first.
pub async fn wait(
    delay: Duration,
    cancel: Option<&CancellationToken>,
    deadline: Option<Instant>,
) -> Result<()> {
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(WaypointError::Cancelled("retry backoff".into())),
        _ = expired => Err(WaypointError::DeadlineExceeded("retry backoff".into())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
