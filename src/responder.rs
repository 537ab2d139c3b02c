//! Lightweight responder for generic, non-Flowhub queries. Replays
//! recent session context so follow-up questions stay coherent, but
//! skips the planner, tools, and agent loop entirely.

use std::sync::Arc;

use serde_json::json;

use crate::sessions::SessionMessage;
use crate::traits::ModelProvider;

const GENERAL_SYSTEM_PROMPT: &str =
    "You are a friendly, concise assistant handling general questions that are \
     not related to Flowhub or workflow automation. Conversation snippets \
     from this session appear before the latest user query. Use them to maintain \
     context, remember names, and stay consistent. If the question is nonsensical \
     or you do not have enough information, reply briefly and say so. Keep responses \
     under four sentences unless the user explicitly asks for more detail.";

pub struct GeneralResponder {
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl GeneralResponder {
    pub fn new(provider: Arc<dyn ModelProvider>, model: String) -> Self {
        Self { provider, model }
    }

    pub async fn respond(
        &self,
        user_query: &str,
        history: &[SessionMessage],
    ) -> anyhow::Result<String> {
        let mut messages = vec![json!({"role": "system", "content": GENERAL_SYSTEM_PROMPT})];

        for msg in history {
            let role = match msg.role.as_str() {
                "user" => "user",
                "assistant" => "assistant",
                _ => continue,
            };
            if msg.message.is_empty() {
                continue;
            }
            messages.push(json!({"role": role, "content": msg.message}));
        }

        messages.push(json!({"role": "user", "content": user_query}));

        let reply = self.provider.respond(&self.model, &messages).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            Ok("I'm here! Let me know how I can help.".to_string())
        } else {
            Ok(reply.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::Mutex;

    use crate::traits::ProviderResponse;

    struct CapturingProvider {
        seen: Mutex<Vec<Value>>,
        reply: String,
    }

    #[async_trait]
    impl ModelProvider for CapturingProvider {
        async fn chat(
            &self,
            _model: &str,
            messages: &[Value],
            _tools: &[Value],
        ) -> anyhow::Result<ProviderResponse> {
            *self.seen.lock().unwrap() = messages.to_vec();
            Ok(ProviderResponse {
                content: Some(self.reply.clone()),
                tool_calls: Vec::new(),
                usage: None,
            })
        }
    }

    fn message(role: &str, text: &str) -> SessionMessage {
        SessionMessage {
            role: role.to_string(),
            message: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replays_history_before_query() {
        let provider = Arc::new(CapturingProvider {
            seen: Mutex::new(Vec::new()),
            reply: "Hello again, Sam.".to_string(),
        });
        let responder = GeneralResponder::new(provider.clone(), "fast".into());

        let history = vec![
            message("user", "my name is Sam"),
            message("assistant", "Nice to meet you, Sam!"),
        ];
        let reply = responder.respond("what's my name?", &history).await.unwrap();
        assert_eq!(reply, "Hello again, Sam.");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 4); // system + 2 history + query
        assert_eq!(seen[0]["role"], "system");
        assert_eq!(seen[1]["content"], "my name is Sam");
        assert_eq!(seen[3]["content"], "what's my name?");
    }

    #[tokio::test]
    async fn empty_reply_gets_default_text() {
        let provider = Arc::new(CapturingProvider {
            seen: Mutex::new(Vec::new()),
            reply: "   ".to_string(),
        });
        let responder = GeneralResponder::new(provider, "fast".into());
        let reply = responder.respond("hi", &[]).await.unwrap();
        assert!(reply.contains("I'm here"));
    }
}
