//! Optional learning collaborator.
//!
//! The pipeline never branches on whether a learning subsystem is installed:
//! it always talks to a [`LearningEngine`], and deployments without one get
//! the no-op implementation at startup.

use crate::ai::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One fully-delivered interaction, emitted after the stream phase completes.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub bot_id: String,
    pub message_id: String,
    pub history: Vec<Message>,
    pub final_text: String,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait LearningEngine: Send + Sync {
    /// Accumulated strategy guidance injected into planner and synthesizer
    /// prompts, if any exists for this bot.
    fn playbook(&self, bot_id: &str) -> Option<String>;

    /// Record a completed interaction.
    async fn observe(&self, record: InteractionRecord);
}

/// Selected at startup when no learning subsystem is configured.
pub struct NoopLearning;

#[async_trait]
impl LearningEngine for NoopLearning {
    fn playbook(&self, _bot_id: &str) -> Option<String> {
        None
    }

    async fn observe(&self, _record: InteractionRecord) {}
}

/// In-process engine: keeps per-bot playbooks and the recent observations.
pub struct MemoryLearning {
    playbooks: RwLock<HashMap<String, String>>,
    observations: Mutex<Vec<InteractionRecord>>,
}

impl MemoryLearning {
    pub fn new() -> Self {
        MemoryLearning {
            playbooks: RwLock::new(HashMap::new()),
            observations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_playbook(&self, bot_id: &str, playbook: impl Into<String>) {
        self.playbooks.write().insert(bot_id.to_string(), playbook.into());
    }

    pub fn observations(&self) -> Vec<InteractionRecord> {
        self.observations.lock().clone()
    }
}

impl Default for MemoryLearning {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LearningEngine for MemoryLearning {
    fn playbook(&self, bot_id: &str) -> Option<String> {
        self.playbooks.read().get(bot_id).cloned()
    }

    async fn observe(&self, record: InteractionRecord) {
        log::info!(
            "[LEARNING] Recorded interaction {} for bot {} ({} chars)",
            record.message_id,
            record.bot_id,
            record.final_text.len()
        );
        self.observations.lock().push(record);
    }
}

/// Fire-and-forget delivery; the stream phase never waits on the learner.
pub fn emit_learning_signal(engine: Arc<dyn LearningEngine>, record: InteractionRecord) {
    tokio::spawn(async move {
        engine.observe(record).await;
    });
}
