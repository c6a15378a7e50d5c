use crate::ai::categories::CategoryOverrides;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A remote tool provider a bot is allowed to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    pub id: String,
    pub name: String,
    /// JSON-RPC endpoint for `tools/list` / `tools/call`
    pub endpoint: String,
    pub enabled: bool,
}

/// Bot configuration, owned by the external configuration collaborator.
/// Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
    /// System prompt describing the bot's voice
    pub personality: String,
    #[serde(default)]
    pub overrides: CategoryOverrides,
    #[serde(default)]
    pub tool_providers: Vec<ToolProviderConfig>,
}

impl BotIdentity {
    /// Providers the discovery fan-out should contact.
    pub fn enabled_providers(&self) -> Vec<&ToolProviderConfig> {
        self.tool_providers.iter().filter(|p| p.enabled).collect()
    }
}

/// Narrow read interface over the external bot-configuration store.
pub trait BotDirectory: Send + Sync {
    fn get(&self, bot_id: &str) -> Option<BotIdentity>;
}

/// In-memory directory for tests and single-process deployments.
pub struct InMemoryBotDirectory {
    bots: RwLock<HashMap<String, BotIdentity>>,
}

impl InMemoryBotDirectory {
    pub fn new() -> Self {
        InMemoryBotDirectory { bots: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, bot: BotIdentity) {
        self.bots.write().insert(bot.id.clone(), bot);
    }
}

impl Default for InMemoryBotDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl BotDirectory for InMemoryBotDirectory {
    fn get(&self, bot_id: &str) -> Option<BotIdentity> {
        self.bots.read().get(bot_id).cloned()
    }
}
