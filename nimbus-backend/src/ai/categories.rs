//! Per-category model configuration.
//!
//! Every model call belongs to one of three categories — decisional,
//! tool-use, or output — each independently configurable. Resolution falls
//! back from the bot's own override to the global defaults, field by field.

use serde::{Deserialize, Serialize};

/// Built-in endpoint used when neither the bot nor the globals name one.
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Context window used when neither the bot nor the globals name one.
const DEFAULT_CONTEXT_WINDOW: u32 = 8192;

/// The category of a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallCategory {
    /// Yes/no and selection decisions (gatekeeping, identification)
    Decisional,
    /// Tool-oriented reasoning (parameter extraction, planning)
    Tools,
    /// User-facing text (acknowledgements, clarifications, synthesis)
    Output,
}

impl CallCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCategory::Decisional => "decisional",
            CallCategory::Tools => "tools",
            CallCategory::Output => "output",
        }
    }
}

impl std::fmt::Display for CallCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partial model settings for one category. Empty fields fall through to the
/// next layer during resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorySettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl CategorySettings {
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|s| !s.is_empty())
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|s| !s.is_empty())
    }

    fn credential(&self) -> Option<&str> {
        self.credential.as_deref().filter(|s| !s.is_empty())
    }
}

/// A bot's per-category overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryOverrides {
    #[serde(default)]
    pub decisional: CategorySettings,
    #[serde(default)]
    pub tools: CategorySettings,
    #[serde(default)]
    pub output: CategorySettings,
}

impl CategoryOverrides {
    pub fn for_category(&self, category: CallCategory) -> &CategorySettings {
        match category {
            CallCategory::Decisional => &self.decisional,
            CallCategory::Tools => &self.tools,
            CallCategory::Output => &self.output,
        }
    }
}

/// Global per-category defaults, loaded from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct CategoryDefaults {
    pub decisional: CategorySettings,
    pub tools: CategorySettings,
    pub output: CategorySettings,
}

impl CategoryDefaults {
    pub fn for_category(&self, category: CallCategory) -> &CategorySettings {
        match category {
            CallCategory::Decisional => &self.decisional,
            CallCategory::Tools => &self.tools,
            CallCategory::Output => &self.output,
        }
    }
}

/// Fully resolved settings for one model call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryConfig {
    pub endpoint: String,
    pub model: String,
    pub context_window: u32,
    pub credential: String,
}

/// Resolve the effective config for a category: bot override first, global
/// default second. Only a missing model name is fatal — endpoint and context
/// window carry built-in fallbacks, and an empty credential is legal (local
/// endpoints often need none).
pub fn resolve_category_config(
    overrides: &CategoryOverrides,
    defaults: &CategoryDefaults,
    category: CallCategory,
) -> Result<CategoryConfig, String> {
    let bot = overrides.for_category(category);
    let global = defaults.for_category(category);

    let model = bot
        .model()
        .or_else(|| global.model())
        .ok_or_else(|| format!("no model configured for {} category", category))?;

    let endpoint = bot
        .endpoint()
        .or_else(|| global.endpoint())
        .unwrap_or(DEFAULT_ENDPOINT);

    let context_window = bot
        .context_window
        .or(global.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW);

    let credential = bot
        .credential()
        .or_else(|| global.credential())
        .unwrap_or("");

    Ok(CategoryConfig {
        endpoint: endpoint.to_string(),
        model: model.to_string(),
        context_window,
        credential: credential.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CategoryDefaults {
        CategoryDefaults {
            decisional: CategorySettings {
                endpoint: Some("http://global/v1".to_string()),
                model: Some("global-small".to_string()),
                context_window: Some(4096),
                credential: Some("global-key".to_string()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bot_override_wins() {
        let overrides = CategoryOverrides {
            decisional: CategorySettings {
                model: Some("bot-model".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let cfg =
            resolve_category_config(&overrides, &defaults(), CallCategory::Decisional).unwrap();
        assert_eq!(cfg.model, "bot-model");
        // Unset fields still fall through to the globals
        assert_eq!(cfg.endpoint, "http://global/v1");
        assert_eq!(cfg.credential, "global-key");
        assert_eq!(cfg.context_window, 4096);
    }

    #[test]
    fn test_empty_string_falls_through() {
        let overrides = CategoryOverrides {
            decisional: CategorySettings {
                model: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        };

        let cfg =
            resolve_category_config(&overrides, &defaults(), CallCategory::Decisional).unwrap();
        assert_eq!(cfg.model, "global-small");
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let err = resolve_category_config(
            &CategoryOverrides::default(),
            &CategoryDefaults::default(),
            CallCategory::Output,
        )
        .unwrap_err();
        assert!(err.contains("output"));
    }

    #[test]
    fn test_builtin_fallbacks() {
        let defaults = CategoryDefaults {
            tools: CategorySettings {
                model: Some("planner".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let cfg = resolve_category_config(
            &CategoryOverrides::default(),
            &defaults,
            CallCategory::Tools,
        )
        .unwrap();
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.context_window, DEFAULT_CONTEXT_WINDOW);
        assert_eq!(cfg.credential, "");
    }
}
