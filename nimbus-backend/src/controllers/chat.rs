use actix_web::{HttpResponse, Responder, web};
use futures_util::stream;

use crate::AppState;
use crate::pipeline::{ChatRequest, StreamError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/chat/decide").route(web::post().to(decide)))
        .service(web::resource("/api/chat/stream/{message_id}").route(web::get().to(stream_reply)));
}

/// Phase 1: run the decision pipeline and answer with exactly one Decision
/// variant. When the decision carries a plan (or a no-tool synthesis), the
/// session context is already parked under the message id by the time this
/// responds.
async fn decide(state: web::Data<AppState>, body: web::Json<ChatRequest>) -> impl Responder {
    let request = body.into_inner();
    log::info!(
        "[CHAT] Decision call for message {} (bot {})",
        request.message_id,
        request.bot_id
    );
    let decision = state.orchestrator.decide(request).await;
    HttpResponse::Ok().json(decision)
}

/// Phase 2: consume the parked context, execute, and stream the reply as
/// `data: {"content": ...}` server-push events. Connection close terminates
/// the stream; an already-consumed or expired context is a 404.
async fn stream_reply(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let message_id = path.into_inner();

    match state.orchestrator.stream(&message_id).await {
        Ok(chunks) => {
            let body = stream::unfold(chunks, |mut chunks| async move {
                let chunk = chunks.recv().await?;
                let event = serde_json::json!({ "content": chunk });
                let frame = web::Bytes::from(format!("data: {}\n\n", event));
                Some((Ok::<web::Bytes, actix_web::Error>(frame), chunks))
            });
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .insert_header(("Cache-Control", "no-cache"))
                .streaming(body)
        }
        Err(StreamError::NotFound) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "session expired or not found"
        })),
        Err(StreamError::Internal(e)) => {
            log::error!("[CHAT] Stream setup failed for {}: {}", message_id, e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "internal server error" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{CategoryDefaults, ClientFactory, MockAiClient};
    use crate::config::Config;
    use crate::learning::NoopLearning;
    use crate::models::InMemoryBotDirectory;
    use crate::pipeline::Orchestrator;
    use crate::session::InMemoryContextStore;
    use crate::tools::provider::HttpProviderTransport;
    use crate::tools::{ToolDiscovery, ToolExecutor};
    use actix_web::{App, test};
    use std::sync::Arc;

    fn test_defaults() -> CategoryDefaults {
        let settings = crate::ai::categories::CategorySettings {
            endpoint: Some("http://localhost/v1/chat/completions".to_string()),
            model: Some("test-model".to_string()),
            context_window: None,
            credential: None,
        };
        CategoryDefaults {
            decisional: settings.clone(),
            tools: settings.clone(),
            output: settings,
        }
    }

    fn app_state(responses: Vec<Result<String, String>>) -> AppState {
        let bots = Arc::new(InMemoryBotDirectory::new());
        bots.register(crate::models::BotIdentity {
            id: "bot-1".to_string(),
            name: "Nimbus".to_string(),
            personality: "You are Nimbus.".to_string(),
            overrides: Default::default(),
            tool_providers: Vec::new(),
        });

        let transport = Arc::new(HttpProviderTransport);
        let discovery = Arc::new(ToolDiscovery::new(transport.clone()));
        let executor = Arc::new(ToolExecutor::new(transport, discovery.clone()));

        AppState {
            config: Config {
                port: 0,
                defaults: CategoryDefaults::default(),
                bot_id: "bot-1".to_string(),
                bot_name: "Nimbus".to_string(),
                bot_personality: String::new(),
                tool_providers: Vec::new(),
            },
            orchestrator: Arc::new(Orchestrator::new(
                bots,
                test_defaults(),
                ClientFactory::Scripted(MockAiClient::new(responses)),
                discovery,
                executor,
                Arc::new(InMemoryContextStore::new()),
                Arc::new(NoopLearning),
            )),
        }
    }

    #[actix_web::test]
    async fn test_decide_then_stream_round_trip() {
        let state = app_state(vec![Ok("Hello from Nimbus!".to_string())]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(config),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/api/chat/decide")
            .set_json(serde_json::json!({
                "bot_id": "bot-1",
                "message_id": "msg-1",
                "text": "hi",
                "is_direct_message": true
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["type"], "synthesize");
        assert_eq!(body["stream_path"], "/api/chat/stream/msg-1");

        let request = test::TestRequest::get()
            .uri("/api/chat/stream/msg-1")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert!(response.status().is_success());
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = test::read_body(response).await;
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("data: "));
        assert!(text.contains("Hello"));

        // Second execution call for the same message id: context is gone
        let request = test::TestRequest::get()
            .uri("/api/chat/stream/msg-1")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
    }

    #[actix_web::test]
    async fn test_stream_unknown_session_is_404() {
        let state = app_state(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(config),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/api/chat/stream/never-decided")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"], "session expired or not found");
    }
}
