//! Batch import of a Flowhub catalog export (JSON) into SQLite.
//!
//! The export is a JSON document with a `pieces` array, each piece
//! carrying nested actions/triggers and their declared input properties.
//! Import replaces the catalog wholesale: existing rows are deleted
//! first, then everything is inserted inside one transaction so a failed
//! import leaves the previous catalog intact.

use std::path::Path;

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogExport {
    pub pieces: Vec<PieceExport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PieceExport {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionExport>,
    #[serde(default)]
    pub triggers: Vec<TriggerExport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionExport {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub properties: Vec<PropertyExport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerExport {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub properties: Vec<PropertyExport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyExport {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Load an export file and import it.
pub async fn import_file(pool: &SqlitePool, path: &Path) -> anyhow::Result<usize> {
    let content = tokio::fs::read_to_string(path).await?;
    let export: CatalogExport = serde_json::from_str(&content)?;
    import_export(pool, &export).await
}

/// Import an export, replacing any existing catalog contents. Returns
/// the number of pieces imported.
pub async fn import_export(pool: &SqlitePool, export: &CatalogExport) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    // Full replace. External-content FTS tables must be wiped with the
    // 'delete-all' command (a plain DELETE would read back content rows
    // that no longer exist); property rows go with their parents via
    // CASCADE.
    for fts in ["pieces_fts", "actions_fts", "triggers_fts"] {
        sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('delete-all')"))
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("DELETE FROM pieces").execute(&mut *tx).await?;

    for piece in &export.pieces {
        let categories_json = serde_json::to_string(&piece.categories)?;
        let piece_id: i64 = sqlx::query_scalar(
            "INSERT INTO pieces (name, display_name, description, logo_url, version, auth_type, categories)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&piece.name)
        .bind(&piece.display_name)
        .bind(&piece.description)
        .bind(&piece.logo_url)
        .bind(&piece.version)
        .bind(&piece.auth_type)
        .bind(&categories_json)
        .fetch_one(&mut *tx)
        .await?;

        for action in &piece.actions {
            let action_id: i64 = sqlx::query_scalar(
                "INSERT INTO actions (piece_id, name, display_name, description, requires_auth)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(piece_id)
            .bind(&action.name)
            .bind(&action.display_name)
            .bind(&action.description)
            .bind(action.requires_auth as i64)
            .fetch_one(&mut *tx)
            .await?;

            for prop in &action.properties {
                insert_property(&mut tx, "action_properties", "action_id", action_id, prop)
                    .await?;
            }
        }

        for trigger in &piece.triggers {
            let trigger_id: i64 = sqlx::query_scalar(
                "INSERT INTO triggers (piece_id, name, display_name, description, trigger_type, requires_auth)
                 VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(piece_id)
            .bind(&trigger.name)
            .bind(&trigger.display_name)
            .bind(&trigger.description)
            .bind(&trigger.trigger_type)
            .bind(trigger.requires_auth as i64)
            .fetch_one(&mut *tx)
            .await?;

            for prop in &trigger.properties {
                insert_property(&mut tx, "trigger_properties", "trigger_id", trigger_id, prop)
                    .await?;
            }
        }
    }

    tx.commit().await?;
    info!(pieces = export.pieces.len(), "Catalog import complete");
    Ok(export.pieces.len())
}

async fn insert_property(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    parent_column: &str,
    parent_id: i64,
    prop: &PropertyExport,
) -> anyhow::Result<()> {
    let options_json = match &prop.options {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    let display_name = if prop.display_name.is_empty() {
        &prop.name
    } else {
        &prop.display_name
    };

    let sql = format!(
        "INSERT INTO {} ({}, name, display_name, description, property_type, required, default_value, options)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        table, parent_column
    );
    sqlx::query(&sql)
        .bind(parent_id)
        .bind(&prop.name)
        .bind(display_name)
        .bind(&prop.description)
        .bind(&prop.property_type)
        .bind(prop.required as i64)
        .bind(&prop.default_value)
        .bind(&options_json)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
