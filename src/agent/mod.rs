//! Tool-calling agent loop: replays session history, prepends the
//! planner's instruction block, and iterates LLM calls + tool execution
//! under an iteration cap and a wall-clock budget. Cancellation is
//! cooperative: the token is checked before every LLM call and every
//! tool execution.

mod system_prompt;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sessions::SessionMessage;
use crate::traits::{ModelProvider, Tool};
use crate::types::StatusUpdate;
use crate::utils::truncate_str;

pub use system_prompt::SYSTEM_PROMPT;

const MAX_ITERATIONS: usize = 25;
const TIME_BUDGET: Duration = Duration::from_secs(120);

/// Returned when the run was cancelled by the client. The server maps
/// this to a `cancelled` frame instead of an error.
#[derive(Debug)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent run cancelled")
    }
}

impl std::error::Error for Cancelled {}

pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    tools: Vec<Arc<dyn Tool>>,
    model: String,
}

impl Agent {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Vec<Arc<dyn Tool>>, model: String) -> Self {
        Self {
            provider,
            tools,
            model,
        }
    }

    /// OpenAI-format tool definitions for all registered tools.
    fn tool_definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": tool.schema()
                })
            })
            .collect()
    }

    async fn execute_tool(&self, name: &str, arguments: &str) -> anyhow::Result<String> {
        for tool in &self.tools {
            if tool.name() == name {
                return tool.call(arguments).await;
            }
        }

        let available: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        // A corrective result rather than an error, so the model picks another tool.
        Ok(format!(
            "Unknown tool '{}'. Available tools: [{}]. Use one of these or respond with text only.",
            name,
            available.join(", ")
        ))
    }

    async fn send_status(&self, status_tx: &Option<mpsc::Sender<StatusUpdate>>, update: StatusUpdate) {
        if let Some(tx) = status_tx {
            let _ = tx.send(update).await;
        }
    }

    /// Run the loop. `input` is the (plan-enhanced) user message;
    /// `history` is the persisted session transcript.
    pub async fn run(
        &self,
        input: &str,
        history: &[SessionMessage],
        status_tx: Option<mpsc::Sender<StatusUpdate>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        let started = Instant::now();
        let tool_defs = self.tool_definitions();

        let mut messages: Vec<Value> =
            vec![json!({"role": "system", "content": SYSTEM_PROMPT})];
        for msg in history {
            let role = match msg.role.as_str() {
                "user" => "user",
                "assistant" => "assistant",
                _ => continue,
            };
            messages.push(json!({"role": role, "content": msg.message}));
        }
        messages.push(json!({"role": "user", "content": input}));

        let mut last_content: Option<String> = None;

        for iteration in 0..MAX_ITERATIONS {
            if cancel.is_cancelled() {
                info!("Agent execution cancelled by client");
                return Err(Cancelled.into());
            }

            let remaining = match TIME_BUDGET.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    warn!(iteration, "Agent time budget exhausted");
                    return Ok(self.budget_exhausted_reply(last_content));
                }
            };

            let response = match tokio::time::timeout(
                remaining,
                self.provider.chat(&self.model, &messages, &tool_defs),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(iteration, "LLM call exceeded the remaining time budget");
                    return Ok(self.budget_exhausted_reply(last_content));
                }
            };

            if let Some(usage) = &response.usage {
                tracing::debug!(
                    model = %usage.model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "LLM call complete"
                );
            }

            if response.tool_calls.is_empty() {
                let reply = response
                    .content
                    .unwrap_or_else(|| "I couldn't generate a response.".to_string());
                self.send_status(&status_tx, StatusUpdate::status("Finalizing response..."))
                    .await;
                return Ok(reply);
            }

            last_content = response.content.clone();

            // Echo the assistant turn (with its tool calls) into history.
            let tool_calls_json: Vec<Value> = response
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments}
                    })
                })
                .collect();
            messages.push(json!({
                "role": "assistant",
                "content": response.content,
                "tool_calls": tool_calls_json,
            }));

            for tool_call in &response.tool_calls {
                if cancel.is_cancelled() {
                    info!("Agent execution cancelled before tool call");
                    return Err(Cancelled.into());
                }

                let status = self
                    .tools
                    .iter()
                    .find(|t| t.name() == tool_call.name)
                    .map(|t| t.status_message())
                    .unwrap_or_else(|| format!("Using {}...", tool_call.name));
                self.send_status(
                    &status_tx,
                    StatusUpdate::tool_status(status, tool_call.name.clone()),
                )
                .await;

                let remaining = TIME_BUDGET
                    .checked_sub(started.elapsed())
                    .unwrap_or(Duration::from_secs(1));
                let result = match tokio::time::timeout(
                    remaining,
                    self.execute_tool(&tool_call.name, &tool_call.arguments),
                )
                .await
                {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        warn!(tool = %tool_call.name, "Tool call failed: {}", e);
                        format!("Tool '{}' failed: {}", tool_call.name, e)
                    }
                    Err(_) => {
                        warn!(tool = %tool_call.name, "Tool call timed out");
                        format!(
                            "Tool '{}' timed out after {}s",
                            tool_call.name,
                            remaining.as_secs()
                        )
                    }
                };

                self.send_status(
                    &status_tx,
                    StatusUpdate::ActionLog {
                        message: truncate_str(&result, 200),
                        tool: tool_call.name.clone(),
                    },
                )
                .await;

                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call.id,
                    "content": result,
                }));

                self.send_status(&status_tx, StatusUpdate::status("Thinking...")).await;
            }
        }

        warn!("Agent hit the iteration limit");
        Ok(self.budget_exhausted_reply(last_content))
    }

    fn budget_exhausted_reply(&self, last_content: Option<String>) -> String {
        match last_content {
            Some(content) if !content.trim().is_empty() => content,
            _ => "I wasn't able to finish within my tool-call budget. \
                  Here's what I suggest: rephrase the question more specifically, \
                  or ask about one piece or action at a time."
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::traits::{ProviderResponse, ToolCall};

    /// Provider that plays back a scripted sequence of responses.
    struct SequenceProvider {
        responses: Mutex<Vec<ProviderResponse>>,
        seen_messages: Mutex<Vec<Vec<Value>>>,
    }

    impl SequenceProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for SequenceProvider {
        async fn chat(
            &self,
            _model: &str,
            messages: &[Value],
            _tools: &[Value],
        ) -> anyhow::Result<ProviderResponse> {
            self.seen_messages.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(text_response("fallback"));
            }
            Ok(responses.remove(0))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes arguments"
        }
        fn schema(&self) -> Value {
            json!({"name": "echo", "parameters": {"type": "object"}})
        }
        async fn call(&self, arguments: &str) -> anyhow::Result<String> {
            Ok(format!("echo: {}", arguments))
        }
    }

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    fn tool_response(name: &str, arguments: &str) -> ProviderResponse {
        ProviderResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
            usage: None,
        }
    }

    #[tokio::test]
    async fn plain_reply_ends_the_loop() {
        let provider = Arc::new(SequenceProvider::new(vec![text_response("all done")]));
        let agent = Agent::new(provider, vec![Arc::new(EchoTool)], "m".into());
        let reply = agent
            .run("hello", &[], None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "all done");
    }

    #[tokio::test]
    async fn tool_call_round_trip() {
        let provider = Arc::new(SequenceProvider::new(vec![
            tool_response("echo", r#"{"query": "gmail"}"#),
            text_response("found it"),
        ]));
        let agent = Agent::new(provider.clone(), vec![Arc::new(EchoTool)], "m".into());
        let reply = agent
            .run("check gmail", &[], None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "found it");

        // Second LLM call must carry the assistant tool_calls turn and the
        // tool result message.
        let seen = provider.seen_messages.lock().unwrap();
        let second = &seen[1];
        let assistant_turn = &second[second.len() - 2];
        assert_eq!(assistant_turn["role"], "assistant");
        assert_eq!(assistant_turn["tool_calls"][0]["function"]["name"], "echo");
        let tool_turn = &second[second.len() - 1];
        assert_eq!(tool_turn["role"], "tool");
        assert!(tool_turn["content"].as_str().unwrap().starts_with("echo:"));
    }

    #[tokio::test]
    async fn unknown_tool_gets_corrective_result() {
        let provider = Arc::new(SequenceProvider::new(vec![
            tool_response("no_such_tool", "{}"),
            text_response("recovered"),
        ]));
        let agent = Agent::new(provider.clone(), vec![Arc::new(EchoTool)], "m".into());
        let reply = agent
            .run("do something", &[], None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "recovered");

        let seen = provider.seen_messages.lock().unwrap();
        let second = &seen[1];
        let tool_turn = &second[second.len() - 1];
        assert!(tool_turn["content"]
            .as_str()
            .unwrap()
            .contains("Unknown tool 'no_such_tool'"));
    }

    #[tokio::test]
    async fn history_is_replayed() {
        use chrono::Utc;
        let provider = Arc::new(SequenceProvider::new(vec![text_response("hi again")]));
        let agent = Agent::new(provider.clone(), vec![], "m".into());

        let history = vec![
            SessionMessage {
                role: "user".into(),
                message: "is gmail supported?".into(),
                timestamp: Utc::now(),
            },
            SessionMessage {
                role: "assistant".into(),
                message: "Yes.".into(),
                timestamp: Utc::now(),
            },
        ];
        agent
            .run("thanks", &history, None, CancellationToken::new())
            .await
            .unwrap();

        let seen = provider.seen_messages.lock().unwrap();
        let first = &seen[0];
        assert_eq!(first.len(), 4); // system + 2 history + input
        assert_eq!(first[1]["content"], "is gmail supported?");
        assert_eq!(first[2]["role"], "assistant");
    }

    #[tokio::test]
    async fn cancellation_stops_before_llm_call() {
        let provider = Arc::new(SequenceProvider::new(vec![text_response("never sent")]));
        let agent = Agent::new(provider, vec![], "m".into());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent.run("hello", &[], None, cancel).await.unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }

    #[tokio::test]
    async fn status_updates_flow_during_tool_calls() {
        let provider = Arc::new(SequenceProvider::new(vec![
            tool_response("echo", "{}"),
            text_response("done"),
        ]));
        let agent = Agent::new(provider, vec![Arc::new(EchoTool)], "m".into());
        let (tx, mut rx) = mpsc::channel(16);

        agent
            .run("go", &[], Some(tx), CancellationToken::new())
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert!(frames.iter().any(|f| matches!(
            f,
            StatusUpdate::Status { tool: Some(t), .. } if t == "echo"
        )));
        assert!(frames.iter().any(|f| matches!(
            f,
            StatusUpdate::Status { message, .. } if message == "Thinking..."
        )));
    }
}
