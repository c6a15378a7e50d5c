//! End-to-end pipeline tests over scripted model output and an in-memory
//! provider transport.

use super::*;
use crate::ai::MockAiClient;
use crate::learning::MemoryLearning;
use crate::models::{InMemoryBotDirectory, ToolProviderConfig};
use crate::session::InMemoryContextStore;
use crate::tools::provider::ProviderTransport;
use crate::tools::rpc::{METHOD_TOOLS_LIST, RpcReply, RpcRequest, StreamMessage};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;

struct PipelineTransport {
    replies: HashMap<String, RpcReply>,
}

impl PipelineTransport {
    fn new(replies: Vec<(&str, RpcReply)>) -> Self {
        PipelineTransport {
            replies: replies.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }
}

#[async_trait]
impl ProviderTransport for PipelineTransport {
    async fn call(&self, _endpoint: &str, request: RpcRequest) -> Result<RpcReply, String> {
        if request.method == METHOD_TOOLS_LIST {
            let tools: Vec<Value> = self
                .replies
                .keys()
                .map(|name| json!({"name": name, "description": "", "inputSchema": {}}))
                .collect();
            return Ok(RpcReply::Result(json!({"tools": tools})));
        }
        let name = request.params.get("name").and_then(|n| n.as_str()).unwrap_or_default();
        self.replies
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no script for tool '{}'", name))
    }

    async fn open_stream(
        &self,
        _ws_url: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamMessage>, String> {
        unimplemented!("pipeline tests only script synchronous tool replies")
    }
}

struct Harness {
    orchestrator: Orchestrator,
    contexts: Arc<InMemoryContextStore>,
    learning: Arc<MemoryLearning>,
}

/// Category defaults that resolve cleanly; the scripted client factory never
/// dials the endpoint.
fn scripted_defaults() -> CategoryDefaults {
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

fn harness(
    responses: Vec<Result<String, String>>,
    tool_replies: Vec<(&str, RpcReply)>,
    with_provider: bool,
) -> Harness {
    let bots = Arc::new(InMemoryBotDirectory::new());
    bots.register(crate::models::BotIdentity {
        id: "bot-1".to_string(),
        name: "Nimbus".to_string(),
        personality: "You are Nimbus.".to_string(),
        overrides: Default::default(),
        tool_providers: if with_provider {
            vec![ToolProviderConfig {
                id: "p1".to_string(),
                name: "provider".to_string(),
                endpoint: "http://provider/rpc".to_string(),
                enabled: true,
            }]
        } else {
            Vec::new()
        },
    });

    let transport = Arc::new(PipelineTransport::new(tool_replies));
    let discovery = Arc::new(ToolDiscovery::new(transport.clone()));
    let executor = Arc::new(ToolExecutor::new(transport, discovery.clone()));
    let contexts = Arc::new(InMemoryContextStore::new());
    let learning = Arc::new(MemoryLearning::new());

    let orchestrator = Orchestrator::new(
        bots,
        scripted_defaults(),
        ClientFactory::Scripted(MockAiClient::new(responses)),
        discovery,
        executor,
        contexts.clone(),
        learning.clone(),
    );

    Harness { orchestrator, contexts, learning }
}

async fn collect_stream(mut rx: tokio::sync::mpsc::Receiver<String>) -> String {
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        text.push_str(&chunk);
    }
    text
}

#[tokio::test]
async fn test_scenario_time_question_runs_one_step_plan() {
    let harness = harness(
        vec![
            Ok(json!({"tools": ["get_current_time"]}).to_string()),
            Ok(json!({"parameters": {"get_current_time": {}}, "missing": []}).to_string()),
            Ok(json!({"steps": [{"order": 1, "tool": "get_current_time", "arguments": {}}]})
                .to_string()),
            Ok("Working on it.".to_string()),
            Ok("It is 14:32 UTC right now.".to_string()),
        ],
        vec![(
            "get_current_time",
            RpcReply::Result(json!({"content": [{"type": "text", "text": "14:32 UTC"}]})),
        )],
        true,
    );

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-a", "what time is it?"))
        .await;

    match &decision {
        Decision::AcknowledgeAndExecute { message, plan, tools, .. } => {
            assert_eq!(message, "Working on it.");
            assert_eq!(plan.steps.len(), 1);
            assert_eq!(tools.len(), 1);
        }
        other => panic!("expected acknowledge, got {:?}", other),
    }

    let rx = harness.orchestrator.stream("msg-a").await.unwrap();
    let text = collect_stream(rx).await;
    assert!(text.contains("14:32"));

    // Learning signal fires after full delivery (fire-and-forget)
    tokio::time::sleep(Duration::from_millis(50)).await;
    let observations = harness.learning.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].final_text, text);
}

#[tokio::test]
async fn test_scenario_missing_parameter_clarifies_without_context() {
    let harness = harness(
        vec![
            Ok(json!({"tools": ["send_email"]}).to_string()),
            Ok(json!({
                "parameters": {},
                "missing": ["send_email.recipient"],
                "question": "value of recipient for send_email?"
            })
            .to_string()),
            Ok("Who should I send that email to?".to_string()),
        ],
        vec![("send_email", RpcReply::Result(json!({"ok": true})))],
        true,
    );

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-b", "send the report"))
        .await;

    match decision {
        Decision::Clarify { question } => {
            assert_eq!(question, "Who should I send that email to?");
        }
        other => panic!("expected clarify, got {:?}", other),
    }

    // No session context is ever written for a clarification turn
    assert!(harness.contexts.take(&crate::session::context_key("msg-b")).await.is_none());
}

#[tokio::test]
async fn test_scenario_unsanctioned_plan_is_rejected() {
    let harness = harness(
        vec![
            Ok(json!({"tools": ["get_current_time"]}).to_string()),
            Ok(json!({"parameters": {"get_current_time": {}}, "missing": []}).to_string()),
            Ok(json!({"steps": [{"order": 1, "tool": "delete_everything", "arguments": {}}]})
                .to_string()),
        ],
        vec![("get_current_time", RpcReply::Result(json!({"time": "14:32"})))],
        true,
    );

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-c", "what time is it?"))
        .await;

    match decision {
        Decision::Stop { reason } => {
            assert_eq!(reason, "internal error: invalid processing plan");
        }
        other => panic!("expected stop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_second_stream_call_finds_nothing() {
    let harness = harness(vec![Ok("Hello there!".to_string())], vec![], false);

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-d", "hi"))
        .await;
    assert!(matches!(decision, Decision::Synthesize { .. }));

    let rx = harness.orchestrator.stream("msg-d").await.unwrap();
    assert_eq!(collect_stream(rx).await, "Hello there!");

    match harness.orchestrator.stream("msg-d").await {
        Err(StreamError::NotFound) => {}
        other => panic!("expected not found, got {:?}", other.map(|_| "stream")),
    }
}

#[tokio::test]
async fn test_gatekeeper_bypassed_for_direct_traffic() {
    // An empty script: any model call would surface "(mock exhausted)", which
    // the gatekeeper treats as malformed and turns into a Stop. A direct
    // message must not touch it.
    let harness = harness(vec![], vec![], false);

    let mut request = ChatRequest::for_tests("msg-e", "hello");
    request.is_direct_message = false;
    request.is_direct_mention = true;

    let decision = harness.orchestrator.decide(request).await;
    assert!(matches!(decision, Decision::Synthesize { .. }));
}

#[tokio::test]
async fn test_gatekeeper_declines_ambient_message() {
    let harness = harness(vec![Ok(json!({"respond": false}).to_string())], vec![], false);

    let mut request = ChatRequest::for_tests("msg-f", "random chatter");
    request.is_direct_message = false;

    let decision = harness.orchestrator.decide(request).await;
    match decision {
        Decision::Stop { reason } => assert!(reason.contains("not addressed")),
        other => panic!("expected stop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_gatekeeper_malformed_output_fails_safe() {
    let harness = harness(vec![Ok("hmm, maybe".to_string())], vec![], false);

    let mut request = ChatRequest::for_tests("msg-g", "random chatter");
    request.is_direct_message = false;

    let decision = harness.orchestrator.decide(request).await;
    match decision {
        Decision::Stop { reason } => assert!(reason.contains("gatekeeper")),
        other => panic!("expected stop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_plan_stops_turn() {
    let harness = harness(
        vec![
            Ok(json!({"tools": ["get_current_time"]}).to_string()),
            Ok(json!({"parameters": {"get_current_time": {}}, "missing": []}).to_string()),
            Ok(json!({"steps": []}).to_string()),
        ],
        vec![("get_current_time", RpcReply::Result(json!({"time": "14:32"})))],
        true,
    );

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-h", "what time is it?"))
        .await;

    match decision {
        Decision::Stop { reason } => assert!(reason.contains("empty processing plan")),
        other => panic!("expected stop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_context_is_gone() {
    let harness = harness(vec![], vec![], false);
    let orchestrator = harness.orchestrator.with_context_ttl(Duration::from_millis(10));

    let decision = orchestrator.decide(ChatRequest::for_tests("msg-i", "hi")).await;
    assert!(matches!(decision, Decision::Synthesize { .. }));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(matches!(orchestrator.stream("msg-i").await, Err(StreamError::NotFound)));
}

#[tokio::test]
async fn test_tool_failure_still_synthesizes() {
    let harness = harness(
        vec![
            Ok(json!({"tools": ["render_chart"]}).to_string()),
            Ok(json!({"parameters": {"render_chart": {}}, "missing": []}).to_string()),
            Ok(json!({"steps": [{"order": 1, "tool": "render_chart", "arguments": {}}]})
                .to_string()),
            Ok("Working on it.".to_string()),
            Ok("I could not render the chart, sorry.".to_string()),
        ],
        vec![(
            "render_chart",
            RpcReply::Error(crate::tools::rpc::RpcError {
                code: -32000,
                message: "renderer offline".to_string(),
                data: None,
            }),
        )],
        true,
    );

    let decision = harness
        .orchestrator
        .decide(ChatRequest::for_tests("msg-j", "chart the data"))
        .await;
    assert!(matches!(decision, Decision::AcknowledgeAndExecute { .. }));

    // The turn still completes: the failure is narrated, not raised
    let rx = harness.orchestrator.stream("msg-j").await.unwrap();
    let text = collect_stream(rx).await;
    assert!(text.contains("could not render"));
}
