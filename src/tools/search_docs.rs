use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::index::{DocHit, DocIndex};
use crate::query::query_variants;
use crate::traits::Tool;

/// Semantic search over the documentation index. Queries are fanned out
/// into platform-flavored variants and the merged hits are re-ranked by
/// distance (query fusion).
pub struct SearchDocsTool {
    index: DocIndex,
    top_k: usize,
}

impl SearchDocsTool {
    pub fn new(index: DocIndex, top_k: usize) -> Self {
        Self { index, top_k }
    }

    async fn fused_search(&self, query: &str) -> anyhow::Result<Vec<DocHit>> {
        let mut merged: Vec<DocHit> = Vec::new();
        for variant in query_variants(query, 3) {
            let hits = self.index.search(&variant, self.top_k).await?;
            for hit in hits {
                if merged.iter().any(|seen| seen.content == hit.content) {
                    continue;
                }
                merged.push(hit);
            }
        }
        merged.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        merged.truncate(self.top_k);
        Ok(merged)
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl Tool for SearchDocsTool {
    fn name(&self) -> &str {
        "search_piece_docs"
    }

    fn description(&self) -> &str {
        "Search the Flowhub knowledge base for detailed piece, action, and trigger documentation"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "search_piece_docs",
            "description": "Search the Flowhub knowledge base for relevant information, including input properties, types, requirements, and options for actions and triggers.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question or topic to search for"
                    }
                },
                "required": ["query"]
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: SearchArgs = serde_json::from_str(arguments)?;

        let hits = match self.fused_search(&args.query).await {
            Ok(hits) => hits,
            Err(e) => return Ok(format!("Error searching knowledge base: {}", e)),
        };

        if hits.is_empty() {
            return Ok("No relevant information found in the knowledge base.".to_string());
        }

        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!("Result {}:\n{}\n\n", i + 1, hit.content));
        }
        Ok(out.trim_end().to_string())
    }

    fn status_message(&self) -> String {
        "Searching the knowledge base...".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::store_with_sample_data;
    use crate::index::EmbeddingService;

    #[tokio::test]
    async fn empty_index_reports_no_results() {
        let store = store_with_sample_data().await;
        let index = DocIndex::new(store.pool().clone(), EmbeddingService::new());
        let tool = SearchDocsTool::new(index, 6);
        let result = tool
            .call(r#"{"query": "gmail send email inputs"}"#)
            .await
            .unwrap();
        assert_eq!(result, "No relevant information found in the knowledge base.");
    }

    #[tokio::test]
    async fn blank_query_reports_no_results() {
        let store = store_with_sample_data().await;
        let index = DocIndex::new(store.pool().clone(), EmbeddingService::new());
        let tool = SearchDocsTool::new(index, 6);
        let result = tool.call(r#"{"query": "   "}"#).await.unwrap();
        assert_eq!(result, "No relevant information found in the knowledge base.");
    }
}
