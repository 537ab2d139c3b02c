//! Index build: render one rich document per piece, action, and trigger
//! from the catalog, embed them in batches, and replace the `documents`
//! table contents. Run via `flowmate build-index` after a catalog import.

use serde_json::{json, Value};
use sqlx::Row;
use tracing::info;

use crate::catalog::{CatalogStore, InputProperty};

use super::DocIndex;

const EMBED_BATCH_SIZE: usize = 64;

/// Rebuild the whole index from the catalog. Returns the document count.
pub async fn rebuild(catalog: &CatalogStore, index: &DocIndex) -> anyhow::Result<usize> {
    let docs = render_catalog_documents(catalog).await?;
    info!(documents = docs.len(), "Rendering complete, embedding...");

    let mut rows: Vec<(String, Value, Vec<f32>)> = Vec::with_capacity(docs.len());
    for batch in docs.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|(content, _)| content.clone()).collect();
        let embeddings = index.embeddings().embed_batch(texts).await?;
        for ((content, metadata), embedding) in batch.iter().cloned().zip(embeddings) {
            rows.push((content, metadata, embedding));
        }
    }

    let count = index.replace_all(rows).await?;
    info!(documents = count, "Documentation index rebuilt");
    Ok(count)
}

/// Render (content, metadata) pairs for every piece, action, and trigger.
pub async fn render_catalog_documents(
    catalog: &CatalogStore,
) -> anyhow::Result<Vec<(String, Value)>> {
    let piece_names: Vec<String> =
        sqlx::query("SELECT name FROM pieces ORDER BY name")
            .fetch_all(catalog.pool())
            .await?
            .into_iter()
            .map(|row| row.get("name"))
            .collect();

    let mut docs = Vec::new();

    for piece_name in piece_names {
        let Some(piece) = catalog.piece_details(&piece_name).await? else {
            continue;
        };
        let categories = piece.categories.join(", ");

        docs.push((
            format!(
                "Piece: {} ({})\nDescription: {}\nCategories: {}\nAuthentication: {}\nType: Integration/Piece",
                piece.display_name,
                piece.name,
                piece.description,
                categories,
                piece.auth_type.as_deref().unwrap_or("none"),
            ),
            json!({
                "type": "piece",
                "name": piece.display_name,
                "slug": piece.name,
                "categories": categories,
            }),
        ));

        for action in &piece.actions {
            let inputs = catalog.action_inputs(&piece.name, &action.name).await?;
            let mut content = format!(
                "Action: {}\nPiece: {}\nDescription: {}\nVariable Name: {}\nRequires Authentication: {}\nType: Action",
                action.display_name,
                piece.display_name,
                action.description,
                action.name,
                action.requires_auth,
            );
            content.push_str(&render_properties("INPUT PROPERTIES", &inputs));

            docs.push((
                content,
                json!({
                    "type": "action",
                    "piece": piece.display_name,
                    "action_name": action.display_name,
                    "slug": piece.name,
                    "requires_auth": action.requires_auth,
                    "num_properties": inputs.len(),
                }),
            ));
        }

        for trigger in &piece.triggers {
            let inputs = catalog.trigger_inputs(&piece.name, &trigger.name).await?;
            let mut content = format!(
                "Trigger: {}\nPiece: {}\nDescription: {}\nVariable Name: {}\nTrigger Type: {}\nRequires Authentication: {}\nType: Trigger",
                trigger.display_name,
                piece.display_name,
                trigger.description,
                trigger.name,
                trigger.trigger_type.as_deref().unwrap_or(""),
                trigger.requires_auth,
            );
            content.push_str(&render_properties("CONFIGURATION PROPERTIES", &inputs));

            docs.push((
                content,
                json!({
                    "type": "trigger",
                    "piece": piece.display_name,
                    "trigger_name": trigger.display_name,
                    "slug": piece.name,
                    "trigger_type": trigger.trigger_type,
                    "requires_auth": trigger.requires_auth,
                    "num_properties": inputs.len(),
                }),
            ));
        }
    }

    Ok(docs)
}

fn render_properties(heading: &str, properties: &[InputProperty]) -> String {
    if properties.is_empty() {
        return String::new();
    }

    let mut out = format!("\n\n{}:", heading);
    for prop in properties {
        out.push_str(&format!(
            "\n  - {} ({}, {})",
            prop.display_name,
            prop.property_type,
            if prop.required { "Required" } else { "Optional" }
        ));
        if !prop.description.is_empty() {
            out.push_str(&format!("\n    Description: {}", prop.description));
        }
        if let Some(default) = &prop.default_value {
            out.push_str(&format!("\n    Default: {}", default));
        }
        if let Some(options) = &prop.options {
            if let Some(labels) = option_labels(options) {
                out.push_str(&format!("\n    Options: {}", labels));
            }
        }
    }
    out
}

/// Render dropdown options, capping at 10 with an "...and N more" tail.
/// Options arrive either as plain strings or {label, value} objects.
fn option_labels(options: &Value) -> Option<String> {
    let list = options.as_array()?;
    if list.is_empty() {
        return None;
    }

    let labels: Vec<String> = list
        .iter()
        .map(|opt| match opt {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("label")
                .and_then(|l| l.as_str())
                .unwrap_or_default()
                .to_string(),
            other => other.to_string(),
        })
        .collect();

    let mut rendered = labels.iter().take(10).cloned().collect::<Vec<_>>().join(", ");
    if labels.len() > 10 {
        rendered.push_str(&format!(" ...and {} more", labels.len() - 10));
    }
    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::store_with_sample_data;

    #[tokio::test]
    async fn renders_piece_action_and_trigger_docs() {
        let store = store_with_sample_data().await;
        let docs = render_catalog_documents(&store).await.unwrap();

        // 3 pieces + 2 actions + 2 triggers
        assert_eq!(docs.len(), 7);

        let piece_doc = docs
            .iter()
            .find(|(content, _)| content.starts_with("Piece: Gmail"))
            .expect("gmail piece doc");
        assert!(piece_doc.0.contains("Categories: Communication"));
        assert_eq!(piece_doc.1["type"], "piece");

        let action_doc = docs
            .iter()
            .find(|(content, _)| content.starts_with("Action: Send Email"))
            .expect("send email action doc");
        assert!(action_doc.0.contains("INPUT PROPERTIES:"));
        assert!(action_doc.0.contains("To (text, Required)"));
        assert!(action_doc.0.contains("Options: plain, html"));
        assert_eq!(action_doc.1["num_properties"], 3);

        let trigger_doc = docs
            .iter()
            .find(|(content, _)| content.starts_with("Trigger: New Email"))
            .expect("new email trigger doc");
        assert!(trigger_doc.0.contains("CONFIGURATION PROPERTIES:"));
        assert!(trigger_doc.0.contains("Default: INBOX"));
    }

    #[test]
    fn option_labels_cap_at_ten() {
        let options: Value = serde_json::json!(
            (0..14).map(|i| format!("opt{}", i)).collect::<Vec<_>>()
        );
        let labels = option_labels(&options).unwrap();
        assert!(labels.contains("opt9"));
        assert!(!labels.contains("opt10,"));
        assert!(labels.ends_with("...and 4 more"));
    }

    #[test]
    fn option_labels_handle_objects() {
        let options = serde_json::json!([
            {"label": "Plain", "value": "plain"},
            {"label": "HTML", "value": "html"}
        ]);
        assert_eq!(option_labels(&options).unwrap(), "Plain, HTML");
    }
}
