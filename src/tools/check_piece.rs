use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::CatalogStore;
use crate::traits::Tool;

/// Existence check: is a named piece, action, or trigger available in
/// the Flowhub catalog?
pub struct CheckPieceTool {
    catalog: CatalogStore,
}

impl CheckPieceTool {
    pub fn new(catalog: CatalogStore) -> Self {
        Self { catalog }
    }
}

#[derive(Deserialize)]
struct CheckArgs {
    query: String,
}

#[async_trait]
impl Tool for CheckPieceTool {
    fn name(&self) -> &str {
        "check_piece"
    }

    fn description(&self) -> &str {
        "Check if an integration (piece), action, or trigger exists in Flowhub"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "check_piece",
            "description": "Check if a specific piece, action, or trigger is available in Flowhub. Returns its details when found.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The name of the piece, action, or trigger to check"
                    }
                },
                "required": ["query"]
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: CheckArgs = serde_json::from_str(arguments)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Ok("Please provide a piece, action, or trigger name to check.".to_string());
        }

        // Piece first, then action, then trigger.
        match self.catalog.find_piece(query).await {
            Ok(Some(piece)) => {
                let mut result = format!(
                    "Yes, Flowhub has the '{}' integration.\nDescription: {}\nCategories: {}\n",
                    piece.display_name,
                    piece.description,
                    piece.categories.join(", "),
                );

                if !piece.actions.is_empty() {
                    let names: Vec<&str> = piece
                        .actions
                        .iter()
                        .take(5)
                        .map(|a| a.display_name.as_str())
                        .collect();
                    result.push_str(&format!(
                        "Actions ({}): {}",
                        piece.actions.len(),
                        names.join(", ")
                    ));
                    if piece.actions.len() > 5 {
                        result.push_str(&format!(" and {} more", piece.actions.len() - 5));
                    }
                    result.push('\n');
                }

                if !piece.triggers.is_empty() {
                    let names: Vec<&str> = piece
                        .triggers
                        .iter()
                        .take(5)
                        .map(|t| t.display_name.as_str())
                        .collect();
                    result.push_str(&format!(
                        "Triggers ({}): {}",
                        piece.triggers.len(),
                        names.join(", ")
                    ));
                    if piece.triggers.len() > 5 {
                        result.push_str(&format!(" and {} more", piece.triggers.len() - 5));
                    }
                }

                return Ok(result);
            }
            Ok(None) => {}
            Err(e) => {
                return Ok(format!(
                    "Catalog lookup failed — unable to verify if '{}' exists in Flowhub ({}).\n\
                     Fallback: check the Flowhub web UI directly. Common integrations include \
                     Gmail, Slack, Google Drive, Google Sheets, Discord, Telegram, HTTP Request, \
                     Webhooks, and many more.",
                    query, e
                ));
            }
        }

        let actions = self.catalog.search_actions(query, 50).await?;
        if !actions.is_empty() {
            let mut result = format!("Found {} action(s) matching '{}':\n\n", actions.len(), query);
            for (i, action) in actions.iter().take(3).enumerate() {
                result.push_str(&format!(
                    "{}. {} (in {})\n   Description: {}\n",
                    i + 1,
                    action.action_display_name,
                    action.piece_display_name,
                    action.description,
                ));
            }
            if actions.len() > 3 {
                result.push_str(&format!("\n... and {} more actions", actions.len() - 3));
            }
            return Ok(result);
        }

        let triggers = self.catalog.search_triggers(query, 50).await?;
        if !triggers.is_empty() {
            let mut result = format!(
                "Found {} trigger(s) matching '{}':\n\n",
                triggers.len(),
                query
            );
            for (i, trigger) in triggers.iter().take(3).enumerate() {
                result.push_str(&format!(
                    "{}. {} (in {})\n   Description: {}\n",
                    i + 1,
                    trigger.trigger_display_name,
                    trigger.piece_display_name,
                    trigger.description,
                ));
            }
            if triggers.len() > 3 {
                result.push_str(&format!("\n... and {} more triggers", triggers.len() - 3));
            }
            return Ok(result);
        }

        Ok(format!(
            "NO - Flowhub does NOT have a '{}' integration/piece.\n\n\
             It's not available as a built-in piece, action, or trigger in Flowhub. \
             You may need to use HTTP requests or webhooks to integrate with {}.",
            query, query
        ))
    }

    fn status_message(&self) -> String {
        "Checking the Flowhub catalog...".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::store_with_sample_data;

    #[tokio::test]
    async fn reports_existing_piece_with_counts() {
        let tool = CheckPieceTool::new(store_with_sample_data().await);
        let result = tool
            .call(r#"{"query": "Gmail"}"#)
            .await
            .unwrap();
        assert!(result.contains("Yes, Flowhub has the 'Gmail' integration"));
        assert!(result.contains("Actions (1): Send Email"));
        assert!(result.contains("Triggers (1): New Email"));
    }

    #[tokio::test]
    async fn falls_through_to_trigger_search() {
        let tool = CheckPieceTool::new(store_with_sample_data().await);
        // "new file" is not a piece, but Google Drive has the trigger.
        let result = tool.call(r#"{"query": "new file"}"#).await.unwrap();
        assert!(result.contains("trigger(s) matching"), "got: {}", result);
        assert!(result.contains("Google Drive"));
    }

    #[tokio::test]
    async fn reports_missing_integration() {
        let tool = CheckPieceTool::new(store_with_sample_data().await);
        let result = tool.call(r#"{"query": "fax machine"}"#).await.unwrap();
        assert!(result.contains("does NOT have"));
        assert!(result.contains("HTTP requests or webhooks"));
    }

    #[tokio::test]
    async fn empty_query_is_handled() {
        let tool = CheckPieceTool::new(store_with_sample_data().await);
        let result = tool.call(r#"{"query": "  "}"#).await.unwrap();
        assert!(result.contains("provide a piece"));
    }
}
