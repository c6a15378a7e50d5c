use crate::ai::categories::CategoryConfig;
use crate::ai::streaming::{ChunkEvent, ChunkReceiver, chunk_channel};
use crate::ai::{Message, MessageRole};
use futures_util::StreamExt;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for OpenAI-compatible chat-completion endpoints.
///
/// Every category config resolves to one of these; the same wire shape covers
/// OpenAI, DigitalOcean, Azure, and local inference servers.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 2000;

fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

impl OpenAiClient {
    pub fn new(config: &CategoryConfig) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        if !config.credential.is_empty() {
            let auth_value =
                header::HeaderValue::from_str(&format!("Bearer {}", config.credential))
                    .map_err(|e| format!("Invalid credential format: {}", e))?;
            auth_headers.insert(header::AUTHORIZATION, auth_value);
        }

        Ok(Self {
            client: crate::http::shared_client().clone(),
            auth_headers,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    fn to_api_messages(messages: Vec<Message>) -> Vec<ApiMessage> {
        messages
            .into_iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    MessageRole::System => "system".to_string(),
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                },
                content: m.content,
            })
            .collect()
    }

    /// Issue the completion request, retrying transient failures with
    /// exponential backoff. Returns the raw HTTP response on success.
    async fn post_with_retries(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, String> {
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = BASE_DELAY_MS * (1 << (attempt - 1));
                log::warn!(
                    "[MODEL] Retry attempt {}/{} after {}ms: {}",
                    attempt,
                    MAX_RETRIES,
                    delay_ms,
                    last_error
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .headers(self.auth_headers.clone())
                .json(request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("model request failed: {}", e);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(parsed) => format!("model API error: {}", parsed.error.message),
                Err(_) => format!("model API returned {}: {}", status, body),
            };

            if is_retryable(status.as_u16()) {
                last_error = message;
                continue;
            }
            return Err(message);
        }

        Err(last_error)
    }

    /// Generate a complete response and return it as one string.
    pub async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::to_api_messages(messages),
            stream: false,
        };

        let response = self.post_with_retries(&request).await?;
        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse model response: {}", e))?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err("model returned no content".to_string());
        }

        Ok(content)
    }

    /// Generate a streamed response. The returned receiver yields text deltas
    /// followed by exactly one `Done` or `Error` event. Dropping the receiver
    /// cancels generation.
    pub async fn generate_stream(&self, messages: Vec<Message>) -> Result<ChunkReceiver, String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::to_api_messages(messages),
            stream: true,
        };

        let response = self.post_with_retries(&request).await?;
        let (tx, rx) = chunk_channel();

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(ChunkEvent::Error(format!("stream read: {}", e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();

                    if payload == "[DONE]" {
                        let _ = tx.send(ChunkEvent::Done).await;
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(payload) else {
                        log::debug!("[MODEL] Unparseable stream line: {}", payload);
                        continue;
                    };
                    let delta = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .unwrap_or_default();

                    if !delta.is_empty() && tx.send(ChunkEvent::Delta(delta)).await.is_err() {
                        // Receiver dropped — caller cancelled
                        return;
                    }
                }
            }

            // Connection ended without an explicit terminator; treat as done
            let _ = tx.send(ChunkEvent::Done).await;
        });

        Ok(rx)
    }
}
