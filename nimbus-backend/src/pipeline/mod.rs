//! The agent orchestration pipeline.
//!
//! Phase 1 (`decide`) runs gate → identify → extract → plan → validate →
//! acknowledge and answers with exactly one [`Decision`]. Plan-carrying and
//! no-tool decisions park a session context under the message id; phase 2
//! (`stream`) is that context's only consumer and turns it into tool
//! execution plus a streamed, synthesized reply.

pub mod parse;
pub mod stages;
pub mod synthesizer;

#[cfg(test)]
mod orchestrator_tests;

use crate::ai::{CallCategory, CategoryDefaults, ChunkEvent, ClientFactory, Message, AiClient};
use crate::learning::{InteractionRecord, LearningEngine, emit_learning_signal};
use crate::models::{BotDirectory, BotIdentity};
use crate::session::{CONTEXT_TTL, ContextStore, SessionContext, context_key};
use crate::tools::{Plan, ToolDefinition, ToolDiscovery, ToolExecutor};
use serde::{Deserialize, Serialize};
use stages::ExtractionOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The inbound decision-call payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub bot_id: String,
    pub message_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub text: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub is_direct_message: bool,
    #[serde(default)]
    pub is_direct_mention: bool,
}

impl ChatRequest {
    /// Direct traffic always proceeds; the gatekeeper only sees the rest.
    pub fn is_direct(&self) -> bool {
        self.is_direct_message || self.is_direct_mention
    }

    #[cfg(test)]
    pub fn for_tests(message_id: &str, text: &str) -> Self {
        ChatRequest {
            bot_id: "bot-1".to_string(),
            message_id: message_id.to_string(),
            channel_id: "c1".to_string(),
            user_id: "u1".to_string(),
            user_name: "tester".to_string(),
            text: text.to_string(),
            history: Vec::new(),
            is_direct_message: true,
            is_direct_mention: false,
        }
    }
}

/// Exactly one of these is returned per inbound message; immutable once
/// returned. The plan and tool definitions ride along internally for the
/// caller-visible acknowledge variant but never serialize.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Stop {
        reason: String,
    },
    Clarify {
        question: String,
    },
    #[serde(rename = "acknowledge")]
    AcknowledgeAndExecute {
        message: String,
        stream_path: String,
        #[serde(skip)]
        plan: Plan,
        #[serde(skip)]
        tools: Vec<ToolDefinition>,
    },
    Synthesize {
        stream_path: String,
    },
}

/// Why the stream phase could not start.
#[derive(Debug)]
pub enum StreamError {
    /// Context consumed, expired, or never written.
    NotFound,
    Internal(String),
}

pub struct Orchestrator {
    bots: Arc<dyn BotDirectory>,
    defaults: CategoryDefaults,
    clients: ClientFactory,
    discovery: Arc<ToolDiscovery>,
    executor: Arc<ToolExecutor>,
    contexts: Arc<dyn ContextStore>,
    learning: Arc<dyn LearningEngine>,
    context_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        bots: Arc<dyn BotDirectory>,
        defaults: CategoryDefaults,
        clients: ClientFactory,
        discovery: Arc<ToolDiscovery>,
        executor: Arc<ToolExecutor>,
        contexts: Arc<dyn ContextStore>,
        learning: Arc<dyn LearningEngine>,
    ) -> Self {
        Orchestrator {
            bots,
            defaults,
            clients,
            discovery,
            executor,
            contexts,
            learning,
            context_ttl: CONTEXT_TTL,
        }
    }

    fn client(&self, bot: &BotIdentity, category: CallCategory) -> Result<AiClient, String> {
        let config = crate::ai::resolve_category_config(&bot.overrides, &self.defaults, category)?;
        self.clients.client_for(&config)
    }

    fn stream_path(message_id: &str) -> String {
        format!("/api/chat/stream/{}", message_id)
    }

    /// Phase 1: route the message through the decision stages. Every failure
    /// mode maps to a Decision; this never propagates an error to the caller.
    pub async fn decide(&self, request: ChatRequest) -> Decision {
        match self.run_decision(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                log::error!(
                    "[PIPELINE] Unexpected failure deciding message {}: {}",
                    request.message_id,
                    e
                );
                Decision::Stop { reason: "internal error".to_string() }
            }
        }
    }

    async fn run_decision(&self, request: &ChatRequest) -> Result<Decision, String> {
        let bot = self
            .bots
            .get(&request.bot_id)
            .ok_or_else(|| format!("unknown bot '{}'", request.bot_id))?;

        if !request.is_direct() {
            let client = self.client(&bot, CallCategory::Decisional)?;
            match stages::gatekeeper(&client, request).await {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("[PIPELINE] Gatekeeper declined message {}", request.message_id);
                    return Ok(Decision::Stop {
                        reason: "message not addressed to the assistant".to_string(),
                    });
                }
                Err(e) => {
                    // Fail safe: an unreadable verdict means "do not respond"
                    return Ok(Decision::Stop { reason: format!("gatekeeper failure: {}", e) });
                }
            }
        }

        let available = self.discovery.tools_for_bot(&bot).await;

        let identified: Vec<ToolDefinition> = if available.is_empty() {
            Vec::new()
        } else {
            let client = self.client(&bot, CallCategory::Tools)?;
            let names = stages::identify_tools(&client, request, &available).await?;
            available
                .iter()
                .filter(|tool| names.contains(&tool.name))
                .cloned()
                .collect()
        };

        if identified.is_empty() {
            // No tools required: park the context and go straight to synthesis
            self.contexts
                .put(
                    &context_key(&request.message_id),
                    SessionContext {
                        bot_id: bot.id.clone(),
                        request: request.clone(),
                        plan: None,
                        tools: Vec::new(),
                    },
                    self.context_ttl,
                )
                .await;
            return Ok(Decision::Synthesize {
                stream_path: Self::stream_path(&request.message_id),
            });
        }

        let tools_client = self.client(&bot, CallCategory::Tools)?;
        let extraction = stages::extract_parameters(&tools_client, request, &identified).await?;
        let parameters = match extraction {
            ExtractionOutcome::Complete(parameters) => parameters,
            ExtractionOutcome::Missing { missing, question } => {
                log::info!(
                    "[PIPELINE] Message {} missing parameters: {:?}",
                    request.message_id,
                    missing
                );
                let output_client = self.client(&bot, CallCategory::Output)?;
                let question = stages::rephrase_question(&output_client, &bot, &question).await;
                // No context is written; the turn ends here
                return Ok(Decision::Clarify { question });
            }
        };

        let playbook = self.learning.playbook(&bot.id);
        let plan =
            stages::plan_steps(&tools_client, request, &parameters, playbook.as_deref()).await?;
        if plan.is_empty() {
            log::warn!("[PIPELINE] Planner produced no steps for message {}", request.message_id);
            return Ok(Decision::Stop {
                reason: "internal error: empty processing plan".to_string(),
            });
        }

        let approved: Vec<String> = identified.iter().map(|t| t.name.clone()).collect();
        if let Err(e) = stages::validate_plan(&plan, &approved) {
            log::error!("[PIPELINE] Rejecting plan for message {}: {}", request.message_id, e);
            return Ok(Decision::Stop {
                reason: "internal error: invalid processing plan".to_string(),
            });
        }

        let output_client = self.client(&bot, CallCategory::Output)?;
        let ack = stages::acknowledge(&output_client, &bot).await;

        self.contexts
            .put(
                &context_key(&request.message_id),
                SessionContext {
                    bot_id: bot.id.clone(),
                    request: request.clone(),
                    plan: Some(plan.clone()),
                    tools: identified.clone(),
                },
                self.context_ttl,
            )
            .await;

        Ok(Decision::AcknowledgeAndExecute {
            message: ack,
            stream_path: Self::stream_path(&request.message_id),
            plan,
            tools: identified,
        })
    }

    /// Phase 2: consume the parked context, execute the plan (if any), and
    /// stream the synthesized reply. The returned channel yields plain text
    /// chunks; it closing is the end of the stream. The learning signal fires
    /// only after the full reply is delivered.
    pub async fn stream(&self, message_id: &str) -> Result<mpsc::Receiver<String>, StreamError> {
        let context = self
            .contexts
            .take(&context_key(message_id))
            .await
            .ok_or(StreamError::NotFound)?;

        let bot = self
            .bots
            .get(&context.bot_id)
            .ok_or_else(|| StreamError::Internal(format!("unknown bot '{}'", context.bot_id)))?;
        let output_client = self
            .client(&bot, CallCategory::Output)
            .map_err(StreamError::Internal)?;
        let playbook = self.learning.playbook(&bot.id);

        let (tx, rx) = mpsc::channel::<String>(32);
        let executor = self.executor.clone();
        let learning = self.learning.clone();
        let message_id = message_id.to_string();

        tokio::spawn(async move {
            // Tool execution runs to completion regardless of the caller; a
            // disconnect is only observed once chunks stop flowing.
            let results = match &context.plan {
                Some(plan) => Some(executor.execute_plan(&bot, plan).await),
                None => None,
            };

            let chunks = synthesizer::synthesize(
                &output_client,
                &bot,
                &context.request,
                results.as_deref(),
                playbook.as_deref(),
            )
            .await;

            let mut chunks = match chunks {
                Ok(chunks) => chunks,
                Err(e) => {
                    log::error!("[STREAM] Synthesis failed for {}: {}", message_id, e);
                    return;
                }
            };

            let mut final_text = String::new();
            loop {
                match chunks.recv().await {
                    Some(ChunkEvent::Delta(delta)) => {
                        if tx.send(delta.clone()).await.is_err() {
                            log::info!("[STREAM] Caller disconnected from {}", message_id);
                            return;
                        }
                        final_text.push_str(&delta);
                    }
                    Some(ChunkEvent::Done) | None => break,
                    Some(ChunkEvent::Error(e)) => {
                        log::error!("[STREAM] Generation error for {}: {}", message_id, e);
                        return;
                    }
                }
            }

            // Fully delivered: hand the exchange to the learning collaborator
            let mut history: Vec<Message> = context
                .request
                .history
                .iter()
                .map(|m| Message {
                    role: match m.role.as_str() {
                        "assistant" => crate::ai::MessageRole::Assistant,
                        "system" => crate::ai::MessageRole::System,
                        _ => crate::ai::MessageRole::User,
                    },
                    content: m.content.clone(),
                })
                .collect();
            history.push(Message::user(context.request.text.clone()));

            emit_learning_signal(
                learning,
                InteractionRecord {
                    bot_id: bot.id.clone(),
                    message_id,
                    history,
                    final_text,
                    completed_at: chrono::Utc::now(),
                },
            );
        });

        Ok(rx)
    }

    #[cfg(test)]
    pub fn with_context_ttl(mut self, ttl: Duration) -> Self {
        self.context_ttl = ttl;
        self
    }
}
