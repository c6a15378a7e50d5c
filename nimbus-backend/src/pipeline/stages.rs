//! The language-model-mediated decision stages.
//!
//! Each stage makes one model call against its category, constrains the
//! output to a single JSON object, and parses defensively. Parse failures
//! degrade to the stage's safest default rather than aborting the turn.

use crate::ai::{AiClient, Message};
use crate::models::BotIdentity;
use crate::pipeline::parse::extract_json;
use crate::pipeline::{ChatMessage, ChatRequest};
use crate::tools::{Plan, ToolDefinition};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Literal acknowledgement used when the output model fails.
pub const FALLBACK_ACK: &str = "One moment while I work on that.";

#[derive(Debug, Deserialize)]
struct GateVerdict {
    respond: bool,
}

#[derive(Debug, Deserialize)]
struct ToolSelection {
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ParameterExtraction {
    /// tool name → complete argument object
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    missing: Vec<String>,
    #[serde(default)]
    question: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedSteps {
    #[serde(default)]
    steps: Vec<crate::tools::PlanStep>,
}

/// What the extractor concluded about the identified tools' arguments.
#[derive(Debug)]
pub enum ExtractionOutcome {
    /// Every required argument is present in context.
    Complete(Map<String, Value>),
    /// Something is missing; the turn ends in a clarification.
    Missing { missing: Vec<String>, question: String },
}

fn render_transcript(history: &[ChatMessage], current: &str) -> String {
    let mut transcript = String::new();
    for message in history {
        transcript.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    transcript.push_str(&format!("user: {}\n", current));
    transcript
}

/// Decide whether the bot should respond to an ambient channel message at
/// all. Never called for direct messages or mentions — those always proceed.
/// Malformed output fails safe to "do not respond".
pub async fn gatekeeper(client: &AiClient, request: &ChatRequest) -> Result<bool, String> {
    let messages = vec![
        Message::system(
            "You observe a group conversation and decide whether an assistant should join in. \
             The assistant should only respond when the latest message is clearly meant for it \
             or asks for something it can help with. \
             Respond with only a JSON object: {\"respond\": true} or {\"respond\": false}.",
        ),
        Message::user(render_transcript(&request.history, &request.text)),
    ];

    let raw = client.generate_text(messages).await?;
    match extract_json::<GateVerdict>(&raw) {
        Some(verdict) => Ok(verdict.respond),
        None => {
            log::warn!("[PIPELINE] Gatekeeper returned malformed output: {}", raw);
            Err("gatekeeper returned malformed output".to_string())
        }
    }
}

/// Pick which of the available tools the message needs. Names outside the
/// offered set are hallucinations and get silently dropped here (the plan
/// validator treats the same condition as fatal — by then it means the
/// planner and identifier disagree). Malformed output means no tools.
pub async fn identify_tools(
    client: &AiClient,
    request: &ChatRequest,
    available: &[ToolDefinition],
) -> Result<Vec<String>, String> {
    let mut catalog = String::new();
    for tool in available {
        catalog.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }

    let messages = vec![
        Message::system(format!(
            "You decide which tools are required to answer the user's latest message.\n\
             Available tools:\n{}\n\
             Respond with only a JSON object: {{\"tools\": [\"name\", ...]}}. \
             Use only names from the list above. Return an empty list when no tool is needed.",
            catalog
        )),
        Message::user(render_transcript(&request.history, &request.text)),
    ];

    let raw = client.generate_text(messages).await?;
    let Some(selection) = extract_json::<ToolSelection>(&raw) else {
        log::warn!("[PIPELINE] Tool identifier returned malformed output: {}", raw);
        return Ok(Vec::new());
    };

    let offered: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
    let (kept, dropped): (Vec<String>, Vec<String>) = selection
        .tools
        .into_iter()
        .partition(|name| offered.contains(&name.as_str()));
    if !dropped.is_empty() {
        log::warn!("[PIPELINE] Dropping unknown tool names from identifier: {:?}", dropped);
    }
    Ok(kept)
}

/// Check whether every argument the identified tools need is present in the
/// conversation. Malformed output degrades to an empty-but-complete mapping;
/// the planner still knows which tools to call.
pub async fn extract_parameters(
    client: &AiClient,
    request: &ChatRequest,
    identified: &[ToolDefinition],
) -> Result<ExtractionOutcome, String> {
    let definitions = serde_json::to_string(identified).unwrap_or_default();

    let messages = vec![
        Message::system(format!(
            "Determine the arguments for these tools from the conversation:\n{}\n\
             Respond with only a JSON object: \
             {{\"parameters\": {{\"tool_name\": {{...}}}}, \"missing\": [], \"question\": null}}. \
             When a required argument cannot be found in the conversation, list it in \"missing\" \
             as \"tool.argument\" and set \"question\" to a precise question that would obtain it.",
            definitions
        )),
        Message::user(render_transcript(&request.history, &request.text)),
    ];

    let raw = client.generate_text(messages).await?;
    let Some(extraction) = extract_json::<ParameterExtraction>(&raw) else {
        log::warn!("[PIPELINE] Parameter extractor returned malformed output: {}", raw);
        return Ok(ExtractionOutcome::Complete(Map::new()));
    };

    if extraction.missing.is_empty() {
        return Ok(ExtractionOutcome::Complete(extraction.parameters));
    }

    let question = extraction
        .question
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| format!("Missing required arguments: {}", extraction.missing.join(", ")));
    Ok(ExtractionOutcome::Missing { missing: extraction.missing, question })
}

/// Order the required tool calls into an executable plan. An empty plan is a
/// failure upstream: the model retracted a need it already identified.
pub async fn plan_steps(
    client: &AiClient,
    request: &ChatRequest,
    parameters: &Map<String, Value>,
    playbook: Option<&str>,
) -> Result<Plan, String> {
    let mut prompt = format!(
        "Order these tool calls into an executable plan. Extracted arguments per tool:\n{}\n\
         Respond with only a JSON object: \
         {{\"steps\": [{{\"order\": 1, \"tool\": \"name\", \"arguments\": {{...}}}}]}}. \
         Orders are unique and ascending. When a step needs an output of an earlier step, \
         use {{\"$step\": <order>, \"$output\": \"<key>\"}} as the argument value.",
        serde_json::to_string(parameters).unwrap_or_default()
    );
    if let Some(playbook) = playbook {
        prompt.push_str(&format!("\n\nStrategies that worked before:\n{}", playbook));
    }

    let messages = vec![
        Message::system(prompt),
        Message::user(render_transcript(&request.history, &request.text)),
    ];

    let raw = client.generate_text(messages).await?;
    let Some(planned) = extract_json::<PlannedSteps>(&raw) else {
        log::warn!("[PIPELINE] Planner returned malformed output: {}", raw);
        return Ok(Plan::default());
    };

    Ok(Plan { steps: planned.steps }.sorted())
}

/// Reject any plan that references a tool outside the identifier's approved
/// set. Hard fail — an unsanctioned call is a hallucination, not a
/// recoverable condition.
pub fn validate_plan(plan: &Plan, approved: &[String]) -> Result<(), String> {
    for step in &plan.steps {
        if !approved.iter().any(|name| name == &step.tool) {
            return Err(format!(
                "plan step {} references unapproved tool '{}'",
                step.order, step.tool
            ));
        }
    }
    Ok(())
}

/// One short "working on it" sentence in the bot's voice. Never names a tool;
/// any failure falls back to a fixed literal rather than failing the turn.
pub async fn acknowledge(client: &AiClient, bot: &BotIdentity) -> String {
    let messages = vec![
        Message::system(format!(
            "{}\n\nWrite exactly one short, non-committal sentence telling the user you are \
             working on their request. Do not name any tool or promise a timeline.",
            bot.personality
        )),
        Message::user("The request will take a little while to process.".to_string()),
    ];

    match client.generate_text(messages).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => FALLBACK_ACK.to_string(),
        Err(e) => {
            log::warn!("[PIPELINE] Acknowledger failed, using fallback: {}", e);
            FALLBACK_ACK.to_string()
        }
    }
}

/// Turn the extractor's technical clarification into a user-facing question
/// in the bot's voice. Falls back to the technical question on failure.
pub async fn rephrase_question(client: &AiClient, bot: &BotIdentity, technical: &str) -> String {
    let messages = vec![
        Message::system(format!(
            "{}\n\nRephrase the following internal question as a single friendly question \
             to the user, keeping every detail that is actually needed.",
            bot.personality
        )),
        Message::user(technical.to_string()),
    ];

    match client.generate_text(messages).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => technical.to_string(),
        Err(e) => {
            log::warn!("[PIPELINE] Clarification rephrasing failed: {}", e);
            technical.to_string()
        }
    }
}
