use crate::models::BotIdentity;
use crate::tools::discovery::ToolDiscovery;
use crate::tools::provider::ProviderTransport;
use crate::tools::rpc::{METHOD_TOOLS_CALL, RpcReply, RpcRequest};
use crate::tools::types::{Plan, PlanStep, ToolExecutionResult};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on waiting for a provider stream's terminal event.
const STREAM_CEILING: Duration = Duration::from_secs(600);

/// Marker keys for cross-step argument references:
/// `{"$step": <order>, "$output": <key>}` in an argument position resolves
/// against the referenced step's already-captured result.
const REF_STEP_KEY: &str = "$step";
const REF_OUTPUT_KEY: &str = "$output";

struct StepRef {
    step: u32,
    output: String,
}

impl StepRef {
    fn parse(value: &Value) -> Option<StepRef> {
        let map = value.as_object()?;
        let step = map.get(REF_STEP_KEY)?.as_u64()? as u32;
        let output = map.get(REF_OUTPUT_KEY)?.as_str()?.to_string();
        Some(StepRef { step, output })
    }
}

/// Executes plans step by step against the owning providers.
///
/// Steps run strictly sequentially — later steps may reference earlier step
/// outputs. A failing step never aborts the plan; it yields an error result,
/// and only steps that reference its output fail in turn.
pub struct ToolExecutor {
    transport: Arc<dyn ProviderTransport>,
    discovery: Arc<ToolDiscovery>,
    stream_ceiling: Duration,
}

impl ToolExecutor {
    pub fn new(transport: Arc<dyn ProviderTransport>, discovery: Arc<ToolDiscovery>) -> Self {
        Self::with_stream_ceiling(transport, discovery, STREAM_CEILING)
    }

    pub fn with_stream_ceiling(
        transport: Arc<dyn ProviderTransport>,
        discovery: Arc<ToolDiscovery>,
        stream_ceiling: Duration,
    ) -> Self {
        ToolExecutor { transport, discovery, stream_ceiling }
    }

    /// Run every plan step in ascending order, producing one result per step.
    pub async fn execute_plan(
        &self,
        bot: &BotIdentity,
        plan: &Plan,
    ) -> Vec<ToolExecutionResult> {
        let mut results = Vec::with_capacity(plan.steps.len());
        // order → Some(result) on success, None on failure
        let mut captured: HashMap<u32, Option<Value>> = HashMap::new();

        for step in &plan.steps {
            let result = self.execute_step(bot, step, &captured).await;
            log::info!(
                "[EXECUTOR] Step {} ({}) {}",
                step.order,
                step.tool,
                if result.success { "succeeded" } else { "failed" }
            );
            captured.insert(step.order, result.result.clone());
            results.push(result);
        }

        results
    }

    async fn execute_step(
        &self,
        bot: &BotIdentity,
        step: &PlanStep,
        captured: &HashMap<u32, Option<Value>>,
    ) -> ToolExecutionResult {
        let arguments = match resolve_arguments(step, captured) {
            Ok(args) => args,
            Err(e) => return ToolExecutionResult::error(&step.tool, e),
        };

        let Some(provider) = self.discovery.locate(bot, &step.tool).await else {
            return ToolExecutionResult::error(
                &step.tool,
                format!("no provider offers tool '{}'", step.tool),
            );
        };

        let request = RpcRequest::new(
            METHOD_TOOLS_CALL,
            json!({"name": step.tool, "arguments": Value::Object(arguments)}),
        );

        let reply = match self.transport.call(&provider.endpoint, request).await {
            Ok(reply) => reply,
            Err(e) => return ToolExecutionResult::error(&step.tool, e),
        };

        match reply {
            RpcReply::Result(value) => ToolExecutionResult::success(&step.tool, value),
            RpcReply::Error(e) => ToolExecutionResult::error(
                &step.tool,
                format!("tool error {}: {}", e.code, e.message),
            ),
            RpcReply::StreamStart { ws_url } => match self.await_stream(&ws_url).await {
                Ok(value) => ToolExecutionResult::success(&step.tool, value),
                Err(e) => ToolExecutionResult::error(&step.tool, e),
            },
        }
    }

    /// Open the handed-off stream and wait for a terminal event. Keep-alive
    /// and progress messages do not resolve the wait; one hard ceiling bounds
    /// the whole thing.
    async fn await_stream(&self, ws_url: &str) -> Result<Value, String> {
        let mut messages = self.transport.open_stream(ws_url).await?;
        let deadline = tokio::time::Instant::now() + self.stream_ceiling;

        loop {
            match tokio::time::timeout_at(deadline, messages.recv()).await {
                Err(_) => {
                    return Err(format!(
                        "stream timed out after {}s",
                        self.stream_ceiling.as_secs()
                    ));
                }
                Ok(None) => return Err("stream closed without a terminal event".to_string()),
                Ok(Some(message)) => {
                    if let Some(outcome) = message.terminal_outcome() {
                        return outcome;
                    }
                    log::debug!("[EXECUTOR] Ignoring non-terminal stream message");
                }
            }
        }
    }
}

fn resolve_arguments(
    step: &PlanStep,
    captured: &HashMap<u32, Option<Value>>,
) -> Result<Map<String, Value>, String> {
    let mut resolved = Map::with_capacity(step.arguments.len());
    for (name, value) in &step.arguments {
        let value = match StepRef::parse(value) {
            Some(reference) => resolve_reference(&reference, captured)
                .map_err(|e| format!("argument '{}': {}", name, e))?,
            None => value.clone(),
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

fn resolve_reference(
    reference: &StepRef,
    captured: &HashMap<u32, Option<Value>>,
) -> Result<Value, String> {
    let slot = captured
        .get(&reference.step)
        .ok_or_else(|| format!("step {} has not produced a result", reference.step))?;
    let result = slot
        .as_ref()
        .ok_or_else(|| format!("step {} failed; its output is unavailable", reference.step))?;
    lookup_output(result, &reference.output)
        .ok_or_else(|| format!("output '{}' not found in step {} result", reference.output, reference.step))
}

/// Locate `key` inside a captured result: flat field first, then a keyed item
/// inside a tagged `content` list, then the special-cased image output.
fn lookup_output(result: &Value, key: &str) -> Option<Value> {
    if let Some(flat) = result.get(key) {
        return Some(flat.clone());
    }

    let content = result.get("content").and_then(|c| c.as_array());
    if let Some(items) = content {
        if let Some(found) = items.iter().find_map(|item| item.get(key)) {
            return Some(found.clone());
        }
        if key == "image" {
            let image = items
                .iter()
                .find(|item| item.get("type").and_then(|t| t.as_str()) == Some("image"))?;
            let source = image
                .get("url")
                .or_else(|| image.get("data"))
                .or_else(|| image.get("source"))?;
            return Some(source.clone());
        }
    }

    None
}
