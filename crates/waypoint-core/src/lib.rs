pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod params;
pub mod retry;
pub mod types;

pub use config::{ActionSpec, EngineSettings, StateSpec, TransitionSpec, WorkflowConfig};
pub use context::{ContextIdentity, ContextSnapshot, ExecutionContext, TransitionRecord};
pub use error::{AggregateError, ConfigErrorKind, ParamErrorKind, Result, WaypointError};
pub use graph::StateGraph;
pub use hooks::{ExecutionHook, HookEvent};
pub use params::Params;
pub use retry::{Backoff, ExponentialBackoff, Jitter, RetryPolicy, RetryRunner};
pub use types::{HookPhase, TransitionResult};
