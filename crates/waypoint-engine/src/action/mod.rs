//! Composable units of work.
//!
//! Every action shares one contract: `execute(context)` mutates the context
//! and either succeeds or returns an error. Composites hold other actions and
//! combine them by nesting. By convention an action records its outcome in
//! the context under keys prefixed with its own name (`{name}_attempts`,
//! `{name}_source`, `{name}_valid`, ...).

pub mod builtin;
pub mod conditional;
pub mod fallback;
pub mod parallel;
pub mod progressive;
pub mod retry;
pub mod sequence;
pub mod validated;

use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::context::ExecutionContext;
use waypoint_core::error::Result;

pub use builtin::{CopyValue, Delay, Fail, FnAction, Log, Noop, SetValue};
pub use conditional::{Branch, Conditional, ConditionalBranch};
pub use fallback::TryWithFallback;
pub use parallel::{MergeStrategy, ParallelWithMerge};
pub use progressive::{DisclosureStep, ProgressiveDisclosure};
pub use retry::{Retry, RetryWithBackoff};
pub use sequence::Sequence;
pub use validated::{ValidatedSequence, ValidatedStep};

/// A unit of work executed against the shared context.
pub trait Action: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>>;
}

pub type ActionRef = Arc<dyn Action>;

/// A side-effect-free test against the context.
pub trait Predicate: Send + Sync + 'static {
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool>;
}

impl<F> Predicate for F
where
    F: Fn(&ExecutionContext) -> Result<bool> + Send + Sync + 'static,
{
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        self(ctx)
    }
}

pub type PredicateRef = Arc<dyn Predicate>;

/// Wrap a closure as a shareable predicate.
pub fn when<F>(f: F) -> PredicateRef
where
    F: Fn(&ExecutionContext) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Predicate matching when `key` holds exactly `value`.
pub fn key_equals(key: impl Into<String>, value: impl Into<serde_json::Value>) -> PredicateRef {
    let key = key.into();
    let value = value.into();
    when(move |ctx| Ok(ctx.get(&key).as_ref() == Some(&value)))
}

/// Record `value` under `{action}_{suffix}`.
pub(crate) fn record(
    ctx: &ExecutionContext,
    action: &str,
    suffix: &str,
    value: impl Into<serde_json::Value>,
) {
    ctx.set(format!("{}_{}", action, suffix), value);
}
