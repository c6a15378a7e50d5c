use crate::ai::categories::{CategoryDefaults, CategorySettings};
use crate::models::ToolProviderConfig;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub defaults: CategoryDefaults,
    pub bot_id: String,
    pub bot_name: String,
    pub bot_personality: String,
    pub tool_providers: Vec<ToolProviderConfig>,
}

fn category_from_env(prefix: &str) -> CategorySettings {
    CategorySettings {
        endpoint: env::var(format!("{}_ENDPOINT", prefix))
            .ok()
            .or_else(|| env::var("NIMBUS_ENDPOINT").ok()),
        model: env::var(format!("{}_MODEL", prefix))
            .ok()
            .or_else(|| env::var("NIMBUS_MODEL").ok()),
        context_window: env::var(format!("{}_CONTEXT_WINDOW", prefix))
            .ok()
            .and_then(|v| v.parse().ok()),
        credential: env::var(format!("{}_CREDENTIAL", prefix))
            .ok()
            .or_else(|| env::var("NIMBUS_CREDENTIAL").ok()),
    }
}

/// Parse `NIMBUS_TOOL_PROVIDERS`, a comma-separated list of `id=endpoint`.
fn providers_from_env() -> Vec<ToolProviderConfig> {
    let raw = env::var("NIMBUS_TOOL_PROVIDERS").unwrap_or_default();
    raw.split(',')
        .filter_map(|entry| {
            let (id, endpoint) = entry.trim().split_once('=')?;
            if id.is_empty() || endpoint.is_empty() {
                return None;
            }
            Some(ToolProviderConfig {
                id: id.to_string(),
                name: id.to_string(),
                endpoint: endpoint.to_string(),
                enabled: true,
            })
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            defaults: CategoryDefaults {
                decisional: category_from_env("NIMBUS_DECISIONAL"),
                tools: category_from_env("NIMBUS_TOOLS"),
                output: category_from_env("NIMBUS_OUTPUT"),
            },
            bot_id: env::var("NIMBUS_BOT_ID").unwrap_or_else(|_| "default".to_string()),
            bot_name: env::var("NIMBUS_BOT_NAME").unwrap_or_else(|_| "Nimbus".to_string()),
            bot_personality: env::var("NIMBUS_BOT_PERSONALITY").unwrap_or_else(|_| {
                "You are Nimbus, a helpful assistant with access to external tools.".to_string()
            }),
            tool_providers: providers_from_env(),
        }
    }
}
