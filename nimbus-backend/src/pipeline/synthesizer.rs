//! Final-answer synthesis.
//!
//! Two variants share one code path: conversational (no tool results) and
//! tool-result (the executed plan's outcomes rendered into a structured
//! appendix, appended as the last contextual message before generation).
//! The synthesizer streams and never offers tools — it cannot trigger
//! further tool calls.

use crate::ai::{AiClient, ChunkReceiver, Message, MessageRole};
use crate::models::BotIdentity;
use crate::pipeline::ChatRequest;
use crate::tools::{ToolExecutionResult, ToolOutput};

/// Render executed-plan outcomes for the model. Failures become explicit
/// per-result error lines so the model can narrate them conversationally
/// instead of surfacing raw payloads.
pub fn render_results_appendix(results: &[ToolExecutionResult]) -> String {
    let mut appendix =
        String::from("Results from the tools that ran for this request:\n");
    for result in results {
        if result.success {
            let rendered: Vec<String> = result
                .result
                .as_ref()
                .map(|value| ToolOutput::from_result(value).iter().map(ToolOutput::render).collect())
                .unwrap_or_default();
            appendix.push_str(&format!("- {}: {}\n", result.tool_name, rendered.join(" ")));
        } else {
            appendix.push_str(&format!(
                "- {}: failed ({})\n",
                result.tool_name,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    appendix.push_str(
        "Answer the user using these results. Explain any failure in plain language; \
         never show raw error payloads.",
    );
    appendix
}

fn build_messages(
    bot: &BotIdentity,
    request: &ChatRequest,
    tool_results: Option<&[ToolExecutionResult]>,
    playbook: Option<&str>,
) -> Vec<Message> {
    let mut system = bot.personality.clone();
    if let Some(playbook) = playbook {
        system.push_str(&format!("\n\nStrategies that worked before:\n{}", playbook));
    }

    let mut messages = vec![Message::system(system)];
    for entry in &request.history {
        let role = match entry.role.as_str() {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        };
        messages.push(Message { role, content: entry.content.clone() });
    }
    messages.push(Message::user(request.text.clone()));

    if let Some(results) = tool_results {
        messages.push(Message::system(render_results_appendix(results)));
    }

    messages
}

/// Stream the final answer. The receiver yields deltas followed by one
/// `Done`/`Error`; dropping it cancels generation mid-stream.
pub async fn synthesize(
    client: &AiClient,
    bot: &BotIdentity,
    request: &ChatRequest,
    tool_results: Option<&[ToolExecutionResult]>,
    playbook: Option<&str>,
) -> Result<ChunkReceiver, String> {
    let messages = build_messages(bot, request, tool_results, playbook);
    client.generate_stream(messages).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_appendix_renders_success_and_failure() {
        let results = vec![
            ToolExecutionResult::success(
                "get_current_time",
                json!({"content": [{"type": "text", "text": "14:32 UTC"}]}),
            ),
            ToolExecutionResult::error("render_chart", "render failed"),
        ];

        let appendix = render_results_appendix(&results);
        assert!(appendix.contains("get_current_time: 14:32 UTC"));
        assert!(appendix.contains("render_chart: failed (render failed)"));
    }

    #[test]
    fn test_appendix_renders_images_and_json() {
        let results = vec![ToolExecutionResult::success(
            "render_chart",
            json!({"content": [
                {"type": "image", "url": "https://x/c.png"},
                {"type": "stats", "mean": 4}
            ]}),
        )];

        let appendix = render_results_appendix(&results);
        assert!(appendix.contains("[image: https://x/c.png]"));
        assert!(appendix.contains("\"mean\":4"));
    }
}
