use crate::tools::rpc::{RpcReply, RpcRequest, StreamMessage};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Transport to tool providers: one JSON-RPC request/response call, plus the
/// upgrade path to a streaming connection. Production talks HTTP/WS; tests
/// install an in-memory implementation.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn call(&self, endpoint: &str, request: RpcRequest) -> Result<RpcReply, String>;

    /// Open the stream behind a `stream/start` hand-off. Messages arrive
    /// already parsed; the channel closing means the connection closed.
    async fn open_stream(&self, ws_url: &str) -> Result<mpsc::Receiver<StreamMessage>, String>;
}

/// HTTP POST + WebSocket transport over the shared client pool.
pub struct HttpProviderTransport;

#[async_trait]
impl ProviderTransport for HttpProviderTransport {
    async fn call(&self, endpoint: &str, request: RpcRequest) -> Result<RpcReply, String> {
        let response = crate::http::shared_client()
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("provider request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("provider returned {}: {}", status, body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("provider returned non-JSON body: {}", e))?;

        RpcReply::parse(&body)
    }

    async fn open_stream(&self, ws_url: &str) -> Result<mpsc::Receiver<StreamMessage>, String> {
        let parsed = url::Url::parse(ws_url).map_err(|e| format!("bad stream url: {}", e))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(format!("bad stream url scheme: {}", parsed.scheme()));
        }

        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("stream connect failed: {}", e))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut ws = ws;
            while let Some(frame) = ws.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("[STREAM] Connection error: {}", e);
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => {
                        let message = match serde_json::from_str::<StreamMessage>(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                log::debug!("[STREAM] Unparseable frame ({}): {}", e, text);
                                continue;
                            }
                        };
                        if tx.send(message).await.is_err() {
                            // Receiver gone — the wait was abandoned
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    // Ping/pong and binary frames carry no protocol messages
                    _ => {}
                }
            }
        });

        Ok(rx)
    }
}
