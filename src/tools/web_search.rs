use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{SearchBackendKind, SearchConfig};
use crate::providers::build_http_client;
use crate::traits::{ModelProvider, Tool};

// ---------------------------------------------------------------------------
// SearchBackend trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI backend (default): reuses the chat provider with a search-style
// system prompt.
// ---------------------------------------------------------------------------

pub struct OpenAiSearchBackend {
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl OpenAiSearchBackend {
    pub fn new(provider: Arc<dyn ModelProvider>, model: String) -> Self {
        Self { provider, model }
    }
}

#[async_trait]
impl SearchBackend for OpenAiSearchBackend {
    async fn search(&self, query: &str) -> anyhow::Result<String> {
        let messages = vec![
            json!({
                "role": "system",
                "content": "You are a web research assistant. Answer the query with current, \
                            factual information. Be concise and cite product or vendor names \
                            where relevant. If you are unsure, say so."
            }),
            json!({"role": "user", "content": query}),
        ];
        let answer = self.provider.respond(&self.model, &messages).await?;
        if answer.trim().is_empty() {
            anyhow::bail!("No results found from web search");
        }
        Ok(answer)
    }
}

// ---------------------------------------------------------------------------
// Perplexity backend
// ---------------------------------------------------------------------------

pub struct PerplexityBackend {
    client: Client,
    api_key: String,
}

impl PerplexityBackend {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let client = build_http_client(Duration::from_secs(10))
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl SearchBackend for PerplexityBackend {
    async fn search(&self, query: &str) -> anyhow::Result<String> {
        if self.api_key.is_empty() {
            anyhow::bail!("Perplexity search is not available (no API key configured)");
        }

        let body = json!({
            "model": "llama-3.1-sonar-small-128k-online",
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful assistant that provides concise, accurate answers."
                },
                {"role": "user", "content": query}
            ],
            "temperature": 0.2,
            "max_tokens": 500
        });

        let resp = self
            .client
            .post("https://api.perplexity.ai/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Perplexity search error ({}): {}", status, text);
        }

        let data: Value = serde_json::from_str(&text)?;
        let answer = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if answer.is_empty() {
            anyhow::bail!("No results found from web search");
        }
        Ok(answer)
    }
}

// ---------------------------------------------------------------------------
// Tool wrapper
// ---------------------------------------------------------------------------

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// Build the configured backend.
    pub fn from_config(
        config: &SearchConfig,
        provider: Arc<dyn ModelProvider>,
        model: String,
    ) -> anyhow::Result<Self> {
        let backend: Arc<dyn SearchBackend> = match config.backend {
            SearchBackendKind::Openai => Arc::new(OpenAiSearchBackend::new(provider, model)),
            SearchBackendKind::Perplexity => {
                Arc::new(PerplexityBackend::new(config.api_key.clone())?)
            }
        };
        Ok(Self { backend })
    }

    pub fn backend(&self) -> Arc<dyn SearchBackend> {
        self.backend.clone()
    }
}

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information not in the Flowhub knowledge base"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "web_search",
            "description": "Search the web for current information. Use when the answer is not in the Flowhub knowledge base or when real-time information is needed.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: WebSearchArgs = serde_json::from_str(arguments)?;
        match self.backend.search(&args.query).await {
            Ok(answer) => Ok(answer),
            // Search failures become tool text so the agent can fall back
            // instead of aborting the whole turn.
            Err(e) => Ok(format!("Web search failed: {}", e)),
        }
    }

    fn status_message(&self) -> String {
        "Searching the web...".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(&'static str);

    #[async_trait]
    impl SearchBackend for FixedBackend {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SearchBackend for FailingBackend {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            anyhow::bail!("backend unavailable")
        }
    }

    #[tokio::test]
    async fn returns_backend_answer() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend("answer text")));
        let result = tool.call(r#"{"query": "latest release"}"#).await.unwrap();
        assert_eq!(result, "answer text");
    }

    #[tokio::test]
    async fn backend_errors_become_tool_text() {
        let tool = WebSearchTool::new(Arc::new(FailingBackend));
        let result = tool.call(r#"{"query": "anything"}"#).await.unwrap();
        assert!(result.contains("Web search failed"));
    }

    #[tokio::test]
    async fn perplexity_without_key_errors() {
        let backend = PerplexityBackend::new(String::new()).unwrap();
        let err = backend.search("query").await.unwrap_err();
        assert!(err.to_string().contains("no API key"));
    }
}
