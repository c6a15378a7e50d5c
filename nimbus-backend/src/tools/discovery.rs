use crate::models::{BotIdentity, ToolProviderConfig};
use crate::tools::provider::ProviderTransport;
use crate::tools::rpc::{METHOD_TOOLS_LIST, RpcReply, RpcRequest};
use crate::tools::types::ToolDefinition;
use futures_util::future::join_all;
use moka::sync::Cache;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long a discovered tool list stays fresh. Invalidated only by expiry.
const DISCOVERY_TTL: Duration = Duration::from_secs(300);

/// Discovers tools across a bot's enabled providers and answers
/// "which provider owns this tool" for the executor.
///
/// Reads are lock-free against the cached snapshot; the fill-on-miss path is
/// serialized by an async mutex with a re-check after acquisition, so
/// concurrent misses for the same bot trigger exactly one fan-out.
pub struct ToolDiscovery {
    transport: Arc<dyn ProviderTransport>,
    /// bot id → merged tool list
    definitions: Cache<String, Arc<Vec<ToolDefinition>>>,
    /// "bot id:tool name" → owning provider id
    locations: Cache<String, String>,
    fill_lock: Mutex<()>,
}

fn location_key(bot_id: &str, tool: &str) -> String {
    format!("{}:{}", bot_id, tool)
}

impl ToolDiscovery {
    pub fn new(transport: Arc<dyn ProviderTransport>) -> Self {
        Self::with_ttl(transport, DISCOVERY_TTL)
    }

    pub fn with_ttl(transport: Arc<dyn ProviderTransport>, ttl: Duration) -> Self {
        ToolDiscovery {
            transport,
            definitions: Cache::builder().time_to_live(ttl).max_capacity(256).build(),
            locations: Cache::builder().time_to_live(ttl).max_capacity(4096).build(),
            fill_lock: Mutex::new(()),
        }
    }

    /// All tools currently available to the bot, from cache or a fresh
    /// concurrent fan-out across its enabled providers.
    pub async fn tools_for_bot(&self, bot: &BotIdentity) -> Arc<Vec<ToolDefinition>> {
        if let Some(hit) = self.definitions.get(&bot.id) {
            return hit;
        }

        let _guard = self.fill_lock.lock().await;
        // Re-check: another task may have filled while we waited
        if let Some(hit) = self.definitions.get(&bot.id) {
            return hit;
        }

        let tools = Arc::new(self.discover(bot).await);
        self.definitions.insert(bot.id.clone(), tools.clone());
        for tool in tools.iter() {
            self.locations
                .insert(location_key(&bot.id, &tool.name), tool.provider_id.clone());
        }
        tools
    }

    /// Resolve the provider owning `tool` for this bot. A location-cache miss
    /// falls back to a (possibly cached) discovery pass; a tool unknown after
    /// that stays unknown until the cache expires.
    pub async fn locate(&self, bot: &BotIdentity, tool: &str) -> Option<ToolProviderConfig> {
        let key = location_key(&bot.id, tool);
        if let Some(provider_id) = self.locations.get(&key) {
            return bot.tool_providers.iter().find(|p| p.id == provider_id).cloned();
        }

        let _ = self.tools_for_bot(bot).await;

        let provider_id = self.locations.get(&key)?;
        bot.tool_providers.iter().find(|p| p.id == provider_id).cloned()
    }

    /// Fan out one `tools/list` per enabled provider and merge. A failed
    /// provider contributes zero tools; it is logged, not retried here.
    async fn discover(&self, bot: &BotIdentity) -> Vec<ToolDefinition> {
        let providers = bot.enabled_providers();
        let listings = join_all(providers.iter().map(|provider| async move {
            (provider.id.clone(), self.list_provider(provider).await)
        }))
        .await;

        let mut merged = Vec::new();
        for (provider_id, listing) in listings {
            match listing {
                Ok(tools) => {
                    log::info!(
                        "[DISCOVERY] Provider {} listed {} tools for bot {}",
                        provider_id,
                        tools.len(),
                        bot.id
                    );
                    merged.extend(tools);
                }
                Err(e) => {
                    log::warn!(
                        "[DISCOVERY] Provider {} failed for bot {}: {}",
                        provider_id,
                        bot.id,
                        e
                    );
                }
            }
        }
        merged
    }

    async fn list_provider(
        &self,
        provider: &ToolProviderConfig,
    ) -> Result<Vec<ToolDefinition>, String> {
        let request = RpcRequest::new(METHOD_TOOLS_LIST, json!({}));
        let reply = self.transport.call(&provider.endpoint, request).await?;

        match reply {
            RpcReply::Result(value) => {
                let raw = value
                    .get("tools")
                    .and_then(|t| t.as_array())
                    .ok_or("tools/list result missing tools array")?;
                let mut tools = Vec::with_capacity(raw.len());
                for entry in raw {
                    let mut tool: ToolDefinition = serde_json::from_value(entry.clone())
                        .map_err(|e| format!("malformed tool definition: {}", e))?;
                    tool.provider_id = provider.id.clone();
                    tools.push(tool);
                }
                Ok(tools)
            }
            RpcReply::Error(e) => Err(format!("tools/list error {}: {}", e.code, e.message)),
            RpcReply::StreamStart { .. } => {
                Err("unexpected stream hand-off from tools/list".to_string())
            }
        }
    }
}
