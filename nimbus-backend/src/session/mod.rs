//! Ephemeral session contexts bridging the two-phase chat protocol.
//!
//! Phase 1 (decision) computes a plan and stores it under the message id;
//! phase 2 (execution/stream) is the only legal consumer, and consumption is
//! destructive. Unconsumed entries expire on their own. Reads after deletion
//! or expiry fail with "not found" — there is no replay.

use crate::pipeline::ChatRequest;
use crate::tools::{Plan, ToolDefinition};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Key prefix for chat session contexts.
pub const CONTEXT_KEY_PREFIX: &str = "chat_context:";

/// Time-to-live for an unconsumed session context.
pub const CONTEXT_TTL: Duration = Duration::from_secs(600);

pub fn context_key(message_id: &str) -> String {
    format!("{}{}", CONTEXT_KEY_PREFIX, message_id)
}

/// Everything phase 2 needs to pick up where phase 1 left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub bot_id: String,
    pub request: ChatRequest,
    /// `None` means the turn needs no tools — go straight to synthesis.
    pub plan: Option<Plan>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// TTL-scoped, exactly-once-consumed keyed storage. The store is swappable;
/// in-process deployments use [`InMemoryContextStore`].
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn put(&self, key: &str, payload: SessionContext, ttl: Duration);

    /// Read and delete. `None` when the key was never stored, already
    /// consumed, or expired.
    async fn take(&self, key: &str) -> Option<SessionContext>;
}

struct StoredContext {
    payload: SessionContext,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredContext {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// In-process store over a concurrent map. Expired entries are dropped
/// opportunistically on every `put` and rejected on `take`.
pub struct InMemoryContextStore {
    entries: DashMap<String, StoredContext>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        InMemoryContextStore { entries: DashMap::new() }
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn put(&self, key: &str, payload: SessionContext, ttl: Duration) {
        self.entries.retain(|_, stored| !stored.is_expired());
        self.entries
            .insert(key.to_string(), StoredContext { payload, stored_at: Instant::now(), ttl });
    }

    async fn take(&self, key: &str) -> Option<SessionContext> {
        let (_, stored) = self.entries.remove(key)?;
        if stored.is_expired() {
            return None;
        }
        Some(stored.payload)
    }
}
