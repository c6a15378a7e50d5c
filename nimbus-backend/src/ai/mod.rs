pub mod categories;
pub mod openai;
pub mod streaming;

pub use categories::{CallCategory, CategoryConfig, CategoryDefaults, resolve_category_config};
pub use openai::OpenAiClient;
pub use streaming::{ChunkEvent, ChunkReceiver};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Mock AI client for tests — returns pre-configured responses from a queue.
/// Shared between clones so one scripted queue can drive a whole pipeline run.
#[derive(Clone)]
pub struct MockAiClient {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
}

impl MockAiClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        MockAiClient {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        }
    }

    fn next_response(&self) -> Result<String, String> {
        let mut queue = self.responses.lock().unwrap();
        queue
            .pop_front()
            .unwrap_or_else(|| Ok("(mock exhausted)".to_string()))
    }
}

/// Unified AI client over any configured category endpoint.
#[derive(Clone)]
pub enum AiClient {
    OpenAi(OpenAiClient),
    Mock(MockAiClient),
}

impl AiClient {
    /// Build a client for a resolved category config.
    pub fn from_category(config: &CategoryConfig) -> Result<Self, String> {
        Ok(AiClient::OpenAi(OpenAiClient::new(config)?))
    }

    /// Generate a complete response as one string.
    pub async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String> {
        match self {
            AiClient::OpenAi(client) => client.generate_text(messages).await,
            AiClient::Mock(client) => client.next_response(),
        }
    }

    /// Generate a streamed response. The mock splits its scripted response
    /// into word-sized deltas so stream consumers see realistic chunking.
    pub async fn generate_stream(&self, messages: Vec<Message>) -> Result<ChunkReceiver, String> {
        match self {
            AiClient::OpenAi(client) => client.generate_stream(messages).await,
            AiClient::Mock(client) => {
                let response = client.next_response();
                let (tx, rx) = streaming::chunk_channel();
                tokio::spawn(async move {
                    match response {
                        Ok(text) => {
                            let words: Vec<String> =
                                text.split_inclusive(' ').map(|w| w.to_string()).collect();
                            for word in words {
                                if tx.send(ChunkEvent::Delta(word)).await.is_err() {
                                    return;
                                }
                            }
                            let _ = tx.send(ChunkEvent::Done).await;
                        }
                        Err(e) => {
                            let _ = tx.send(ChunkEvent::Error(e)).await;
                        }
                    }
                });
                Ok(rx)
            }
        }
    }
}

/// Produces a client per resolved category config. The scripted variant hands
/// every category the same shared mock queue, so tests enqueue responses in
/// pipeline call order.
#[derive(Clone)]
pub enum ClientFactory {
    Http,
    Scripted(MockAiClient),
}

impl ClientFactory {
    pub fn client_for(&self, config: &CategoryConfig) -> Result<AiClient, String> {
        match self {
            ClientFactory::Http => AiClient::from_category(config),
            ClientFactory::Scripted(mock) => Ok(AiClient::Mock(mock.clone())),
        }
    }
}
