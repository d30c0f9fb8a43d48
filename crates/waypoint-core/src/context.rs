use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correlation ids carried by a workflow run. Immutable once the context exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextIdentity {
    pub session_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

impl ContextIdentity {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }
}

/// One recorded state-to-state move. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    pub data_snapshot: HashMap<String, Value>,
}

/// Serializable point-in-time view of a context, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub identity: ContextIdentity,
    pub current_state: String,
    pub data: HashMap<String, Value>,
    pub history: Vec<TransitionRecord>,
    pub path_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Inner {
    data: HashMap<String, Value>,
    current_state: String,
    history: Vec<TransitionRecord>,
    path_history: Vec<String>,
    updated_at: DateTime<Utc>,
}

/// Shared, thread-safe state of one workflow run.
///
/// All operations take `&self` and never fail. `Clone` is a deep copy: the
/// clone owns its own data, history, and path, and evolves independently of
/// the original. Clones share the run's cancellation token.
#[derive(Debug)]
pub struct ExecutionContext {
    identity: ContextIdentity,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    inner: RwLock<Inner>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_identity(ContextIdentity::new())
    }

    pub fn with_identity(identity: ContextIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            created_at: now,
            cancel: CancellationToken::new(),
            inner: RwLock::new(Inner {
                data: HashMap::new(),
                current_state: String::new(),
                history: Vec::new(),
                path_history: Vec::new(),
                updated_at: now,
            }),
        }
    }

    /// Create a context pre-populated with data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        let ctx = Self::new();
        ctx.merge(data);
        ctx
    }

    /// Attach an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read().updated_at
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation to the run and every clone of this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // Poisoning only means another thread panicked mid-write; the maps are
    // still structurally valid, so keep serving them.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.updated_at = Utc::now();
        guard
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().data.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().data.contains_key(key)
    }

    /// Set a value. Last write wins.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().data.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().data.remove(key)
    }

    /// Get a value as a string. `None` if absent or not a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.read()
            .data
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Get a value as a bool. `None` if absent or not a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.read().data.get(key).and_then(Value::as_bool)
    }

    /// Get a value as an integer. `None` if absent or not an integer.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.read().data.get(key).and_then(Value::as_i64)
    }

    /// Bulk insert, overwriting on conflict.
    pub fn merge(&self, data: impl IntoIterator<Item = (String, Value)>) {
        let mut inner = self.write();
        for (k, v) in data {
            inner.data.insert(k, v);
        }
    }

    /// Copy of the data map.
    pub fn data(&self) -> HashMap<String, Value> {
        self.read().data.clone()
    }

    pub fn current_state(&self) -> String {
        self.read().current_state.clone()
    }

    pub fn set_current_state(&self, state: impl Into<String>) {
        self.write().current_state = state.into();
    }

    /// Append a transition record to the history.
    pub fn add_transition(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        data: HashMap<String, Value>,
    ) {
        let record = TransitionRecord {
            from: from.into(),
            to: to.into(),
            timestamp: Utc::now(),
            data_snapshot: data,
        };
        self.write().history.push(record);
    }

    /// Record that a state was entered.
    pub fn append_to_path(&self, state: impl Into<String>) {
        self.write().path_history.push(state.into());
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.read().history.clone()
    }

    pub fn path_history(&self) -> Vec<String> {
        self.read().path_history.clone()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let inner = self.read();
        ContextSnapshot {
            identity: self.identity.clone(),
            current_state: inner.current_state.clone(),
            data: inner.data.clone(),
            history: inner.history.clone(),
            path_history: inner.path_history.clone(),
            created_at: self.created_at,
            updated_at: inner.updated_at,
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ExecutionContext {
    fn clone(&self) -> Self {
        let inner = self.read().clone();
        Self {
            identity: self.identity.clone(),
            created_at: self.created_at,
            cancel: self.cancel.clone(),
            inner: RwLock::new(inner),
        }
    }
}
