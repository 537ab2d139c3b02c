pub mod import;
mod migrations;

use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

pub(crate) use migrations::{migrate_catalog, migrate_documents};

/// Read side of the Flowhub piece catalog: pieces, their actions and
/// triggers, and the declared input properties of each.
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieceSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub auth_type: Option<String>,
    pub categories: Vec<String>,
    pub action_count: i64,
    pub trigger_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub requires_auth: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub trigger_type: Option<String>,
    pub requires_auth: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieceDetails {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub auth_type: Option<String>,
    pub categories: Vec<String>,
    pub actions: Vec<ActionSummary>,
    pub triggers: Vec<TriggerSummary>,
}

/// An action hit from cross-piece search, joined back to its piece.
#[derive(Debug, Clone, Serialize)]
pub struct ActionMatch {
    pub piece_name: String,
    pub piece_display_name: String,
    pub action_name: String,
    pub action_display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerMatch {
    pub piece_name: String,
    pub piece_display_name: String,
    pub trigger_name: String,
    pub trigger_display_name: String,
    pub description: String,
}

/// A declared input property of an action or trigger.
#[derive(Debug, Clone, Serialize)]
pub struct InputProperty {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub property_type: String,
    pub required: bool,
    pub default_value: Option<String>,
    /// Enumerated options for dropdown-style properties (raw JSON).
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CatalogStats {
    pub total_pieces: i64,
    pub total_actions: i64,
    pub total_triggers: i64,
}

/// Sanitize free text into an FTS5 MATCH expression: strip operators and
/// quote each token. Returns None when nothing searchable remains.
fn fts_query(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Additive relevance score for a piece against a query: substring hit
/// in the internal name scores highest, then display name, description,
/// and categories.
fn relevance(piece: &PieceSummary, query_lower: &str) -> i32 {
    let mut score = 0;
    if piece.name.to_lowercase().contains(query_lower) {
        score += 100;
    }
    if piece.display_name.to_lowercase().contains(query_lower) {
        score += 80;
    }
    if piece.description.to_lowercase().contains(query_lower) {
        score += 40;
    }
    for category in &piece.categories {
        if category.to_lowercase().contains(query_lower) {
            score += 30;
        }
    }
    score
}

fn parse_categories(raw: Option<String>) -> Vec<String> {
    match raw {
        Some(text) if !text.is_empty() => match serde_json::from_str(&text) {
            Ok(list) => list,
            Err(_) => vec![text],
        },
        _ => Vec::new(),
    }
}

impl CatalogStore {
    /// Open (or create) the catalog database and run migrations.
    pub async fn open(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool (used by tests with `sqlite::memory:`).
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        migrations::migrate_catalog(&pool).await?;
        migrations::migrate_documents(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Find a piece by free-text name: exact match on the internal or
    /// display name first, then best-ranked search hit.
    pub async fn find_piece(&self, name: &str) -> anyhow::Result<Option<PieceDetails>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let exact: Option<String> = sqlx::query_scalar(
            "SELECT name FROM pieces
             WHERE LOWER(name) = ? OR LOWER(display_name) = ?
             LIMIT 1",
        )
        .bind(&needle)
        .bind(&needle)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(piece_name) = exact {
            return self.piece_details(&piece_name).await;
        }

        let candidates = self.search_pieces(&needle, 1).await?;
        match candidates.first() {
            Some(hit) => self.piece_details(&hit.name).await,
            None => Ok(None),
        }
    }

    /// FTS search over pieces, re-ranked by relevance to the raw query.
    pub async fn search_pieces(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<PieceSummary>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        // Over-fetch so the re-rank has something to work with.
        let fetch = (limit.max(1) * 4).min(50) as i64;
        let rows = sqlx::query(
            "SELECT p.name, p.display_name, p.description, p.auth_type, p.categories,
                    p.action_count, p.trigger_count
             FROM pieces_fts
             JOIN pieces_with_capabilities p ON pieces_fts.rowid = p.id
             WHERE pieces_fts MATCH ?
             LIMIT ?",
        )
        .bind(&match_expr)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

        let mut pieces: Vec<PieceSummary> = rows
            .into_iter()
            .map(|row| PieceSummary {
                name: row.get("name"),
                display_name: row.get("display_name"),
                description: row.get::<Option<String>, _>("description").unwrap_or_default(),
                auth_type: row.get("auth_type"),
                categories: parse_categories(row.get("categories")),
                action_count: row.get("action_count"),
                trigger_count: row.get("trigger_count"),
            })
            .collect();

        let query_lower = query.trim().to_lowercase();
        pieces.sort_by_key(|p| -relevance(p, &query_lower));
        pieces.truncate(limit);
        Ok(pieces)
    }

    /// FTS search over actions across all pieces.
    pub async fn search_actions(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ActionMatch>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            "SELECT p.name AS piece_name, p.display_name AS piece_display_name,
                    a.name AS action_name, a.display_name AS action_display_name,
                    a.description
             FROM actions_fts
             JOIN actions a ON actions_fts.rowid = a.id
             JOIN pieces p ON a.piece_id = p.id
             WHERE actions_fts MATCH ?
             ORDER BY p.display_name, a.display_name
             LIMIT ?",
        )
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ActionMatch {
                piece_name: row.get("piece_name"),
                piece_display_name: row.get("piece_display_name"),
                action_name: row.get("action_name"),
                action_display_name: row.get("action_display_name"),
                description: row.get::<Option<String>, _>("description").unwrap_or_default(),
            })
            .collect())
    }

    /// Substring search over triggers. Trigger names are short enough
    /// that LIKE matching beats tokenized FTS here.
    pub async fn search_triggers(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<TriggerMatch>> {
        let needle = format!("%{}%", query.trim().to_lowercase());
        let rows = sqlx::query(
            "SELECT p.name AS piece_name, p.display_name AS piece_display_name,
                    t.name AS trigger_name, t.display_name AS trigger_display_name,
                    t.description
             FROM triggers t
             JOIN pieces p ON t.piece_id = p.id
             WHERE LOWER(t.display_name) LIKE ? OR LOWER(t.name) LIKE ?
             ORDER BY p.display_name, t.display_name
             LIMIT ?",
        )
        .bind(&needle)
        .bind(&needle)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TriggerMatch {
                piece_name: row.get("piece_name"),
                piece_display_name: row.get("piece_display_name"),
                trigger_name: row.get("trigger_name"),
                trigger_display_name: row.get("trigger_display_name"),
                description: row.get::<Option<String>, _>("description").unwrap_or_default(),
            })
            .collect())
    }

    /// Complete details for a piece by internal name, with nested
    /// actions and triggers.
    pub async fn piece_details(&self, piece_name: &str) -> anyhow::Result<Option<PieceDetails>> {
        let row = sqlx::query(
            "SELECT id, name, display_name, description, auth_type, categories
             FROM pieces WHERE name = ?",
        )
        .bind(piece_name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let piece_id: i64 = row.get("id");
        let mut details = PieceDetails {
            name: row.get("name"),
            display_name: row.get("display_name"),
            description: row.get::<Option<String>, _>("description").unwrap_or_default(),
            auth_type: row.get("auth_type"),
            categories: parse_categories(row.get("categories")),
            actions: Vec::new(),
            triggers: Vec::new(),
        };

        let action_rows = sqlx::query(
            "SELECT name, display_name, description, requires_auth
             FROM actions WHERE piece_id = ? ORDER BY display_name",
        )
        .bind(piece_id)
        .fetch_all(&self.pool)
        .await?;
        details.actions = action_rows
            .into_iter()
            .map(|r| ActionSummary {
                name: r.get("name"),
                display_name: r.get("display_name"),
                description: r.get::<Option<String>, _>("description").unwrap_or_default(),
                requires_auth: r.get::<i64, _>("requires_auth") != 0,
            })
            .collect();

        let trigger_rows = sqlx::query(
            "SELECT name, display_name, description, trigger_type, requires_auth
             FROM triggers WHERE piece_id = ? ORDER BY display_name",
        )
        .bind(piece_id)
        .fetch_all(&self.pool)
        .await?;
        details.triggers = trigger_rows
            .into_iter()
            .map(|r| TriggerSummary {
                name: r.get("name"),
                display_name: r.get("display_name"),
                description: r.get::<Option<String>, _>("description").unwrap_or_default(),
                trigger_type: r.get("trigger_type"),
                requires_auth: r.get::<i64, _>("requires_auth") != 0,
            })
            .collect();

        Ok(Some(details))
    }

    /// Input properties for an action, required-first. Accepts either the
    /// internal or display name of both piece and action.
    pub async fn action_inputs(
        &self,
        piece: &str,
        action: &str,
    ) -> anyhow::Result<Vec<InputProperty>> {
        let piece_lower = piece.trim().to_lowercase();
        let action_lower = action.trim().to_lowercase();
        let rows = sqlx::query(
            "SELECT ap.name, ap.display_name, ap.description, ap.property_type,
                    ap.required, ap.default_value, ap.options
             FROM pieces p
             JOIN actions a ON p.id = a.piece_id
             JOIN action_properties ap ON a.id = ap.action_id
             WHERE (LOWER(p.name) = ? OR LOWER(p.display_name) = ?)
               AND (LOWER(a.name) = ? OR LOWER(a.display_name) = ?)
             ORDER BY ap.required DESC, ap.display_name",
        )
        .bind(&piece_lower)
        .bind(&piece_lower)
        .bind(&action_lower)
        .bind(&action_lower)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(input_property_from_row).collect())
    }

    /// Input properties for a trigger, required-first.
    pub async fn trigger_inputs(
        &self,
        piece: &str,
        trigger: &str,
    ) -> anyhow::Result<Vec<InputProperty>> {
        let piece_lower = piece.trim().to_lowercase();
        let trigger_lower = trigger.trim().to_lowercase();
        let rows = sqlx::query(
            "SELECT tp.name, tp.display_name, tp.description, tp.property_type,
                    tp.required, tp.default_value, tp.options
             FROM pieces p
             JOIN triggers t ON p.id = t.piece_id
             JOIN trigger_properties tp ON t.id = tp.trigger_id
             WHERE (LOWER(p.name) = ? OR LOWER(p.display_name) = ?)
               AND (LOWER(t.name) = ? OR LOWER(t.display_name) = ?)
             ORDER BY tp.required DESC, tp.display_name",
        )
        .bind(&piece_lower)
        .bind(&piece_lower)
        .bind(&trigger_lower)
        .bind(&trigger_lower)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(input_property_from_row).collect())
    }

    /// Formatted capability summary ("Actions: ... / Triggers: ...") for
    /// prompt context. None when the piece is unknown.
    pub async fn piece_overview(&self, name: &str) -> anyhow::Result<Option<String>> {
        let Some(details) = self.find_piece(name).await? else {
            return Ok(None);
        };

        let mut out = format!(
            "{} — {}\n",
            details.display_name,
            if details.description.is_empty() {
                "(no description)"
            } else {
                &details.description
            }
        );

        if details.actions.is_empty() {
            out.push_str("Actions: none\n");
        } else {
            out.push_str(&format!("Actions ({}):\n", details.actions.len()));
            for action in &details.actions {
                out.push_str(&format!(
                    "  - {}: {}\n",
                    action.display_name, action.description
                ));
            }
        }

        if details.triggers.is_empty() {
            out.push_str("Triggers: none\n");
        } else {
            out.push_str(&format!("Triggers ({}):\n", details.triggers.len()));
            for trigger in &details.triggers {
                out.push_str(&format!(
                    "  - {}: {}\n",
                    trigger.display_name, trigger.description
                ));
            }
        }

        Ok(Some(out))
    }

    pub async fn stats(&self) -> anyhow::Result<CatalogStats> {
        let total_pieces: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pieces")
            .fetch_one(&self.pool)
            .await?;
        let total_actions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions")
            .fetch_one(&self.pool)
            .await?;
        let total_triggers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triggers")
            .fetch_one(&self.pool)
            .await?;
        Ok(CatalogStats {
            total_pieces,
            total_actions,
            total_triggers,
        })
    }
}

fn input_property_from_row(row: sqlx::sqlite::SqliteRow) -> InputProperty {
    let options_raw: Option<String> = row.get("options");
    let options = options_raw.and_then(|text| {
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Unparseable options JSON, passing through as text: {}", e);
                Some(serde_json::Value::String(text))
            }
        }
    });

    InputProperty {
        name: row.get("name"),
        display_name: row.get("display_name"),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        property_type: row
            .get::<Option<String>, _>("property_type")
            .unwrap_or_else(|| "text".to_string()),
        required: row.get::<i64, _>("required") != 0,
        default_value: row.get("default_value"),
        options,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::catalog::import::{
        ActionExport, CatalogExport, PieceExport, PropertyExport, TriggerExport,
    };

    /// A small catalog with a few representative pieces.
    pub fn sample_export() -> CatalogExport {
        CatalogExport {
            pieces: vec![
                PieceExport {
                    name: "gmail".into(),
                    display_name: "Gmail".into(),
                    description: Some("Send and receive email with Gmail".into()),
                    logo_url: None,
                    version: Some("1.2.0".into()),
                    auth_type: Some("OAuth2".into()),
                    categories: vec!["Communication".into()],
                    actions: vec![ActionExport {
                        name: "send_email".into(),
                        display_name: "Send Email".into(),
                        description: Some("Send an email from your Gmail account".into()),
                        requires_auth: true,
                        properties: vec![
                            PropertyExport {
                                name: "to".into(),
                                display_name: "To".into(),
                                description: Some("Recipient address".into()),
                                property_type: Some("text".into()),
                                required: true,
                                default_value: None,
                                options: None,
                            },
                            PropertyExport {
                                name: "subject".into(),
                                display_name: "Subject".into(),
                                description: None,
                                property_type: Some("text".into()),
                                required: true,
                                default_value: None,
                                options: None,
                            },
                            PropertyExport {
                                name: "body_type".into(),
                                display_name: "Body Type".into(),
                                description: None,
                                property_type: Some("dropdown".into()),
                                required: false,
                                default_value: Some("plain".into()),
                                options: Some(serde_json::json!(["plain", "html"])),
                            },
                        ],
                    }],
                    triggers: vec![TriggerExport {
                        name: "new_email".into(),
                        display_name: "New Email".into(),
                        description: Some("Fires when a new email arrives".into()),
                        trigger_type: Some("polling".into()),
                        requires_auth: true,
                        properties: vec![PropertyExport {
                            name: "label".into(),
                            display_name: "Label".into(),
                            description: Some("Only watch this label".into()),
                            property_type: Some("text".into()),
                            required: false,
                            default_value: Some("INBOX".into()),
                            options: None,
                        }],
                    }],
                },
                PieceExport {
                    name: "slack".into(),
                    display_name: "Slack".into(),
                    description: Some("Team messaging".into()),
                    logo_url: None,
                    version: None,
                    auth_type: Some("OAuth2".into()),
                    categories: vec!["Communication".into()],
                    actions: vec![ActionExport {
                        name: "send_message".into(),
                        display_name: "Send Message".into(),
                        description: Some("Post a message to a channel".into()),
                        requires_auth: true,
                        properties: vec![],
                    }],
                    triggers: vec![],
                },
                PieceExport {
                    name: "google_drive".into(),
                    display_name: "Google Drive".into(),
                    description: Some("File storage and sharing".into()),
                    logo_url: None,
                    version: None,
                    auth_type: Some("OAuth2".into()),
                    categories: vec!["Storage".into()],
                    actions: vec![],
                    triggers: vec![TriggerExport {
                        name: "new_file".into(),
                        display_name: "New File".into(),
                        description: Some("Fires when a file is added to a folder".into()),
                        trigger_type: Some("polling".into()),
                        requires_auth: true,
                        properties: vec![],
                    }],
                },
            ],
        }
    }

    pub async fn store_with_sample_data() -> CatalogStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = CatalogStore::from_pool(pool).await.unwrap();
        import::import_export(store.pool(), &sample_export())
            .await
            .unwrap();
        store
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::store_with_sample_data;
    use super::*;

    #[test]
    fn fts_query_strips_operators() {
        assert_eq!(fts_query("send email"), Some("\"send\" \"email\"".into()));
        assert_eq!(
            fts_query("\"quoted\" AND *star"),
            Some("\"quoted\" \"AND\" \"star\"".into())
        );
        assert_eq!(fts_query("  !!!  "), None);
        assert_eq!(fts_query(""), None);
    }

    #[test]
    fn relevance_prefers_name_hits() {
        let piece = |name: &str, display: &str, desc: &str| PieceSummary {
            name: name.into(),
            display_name: display.into(),
            description: desc.into(),
            auth_type: None,
            categories: vec!["Communication".into()],
            action_count: 0,
            trigger_count: 0,
        };

        let exact = piece("gmail", "Gmail", "Send email");
        let desc_only = piece("slack", "Slack", "gmail-adjacent tool");
        assert!(relevance(&exact, "gmail") > relevance(&desc_only, "gmail"));
        assert_eq!(relevance(&exact, "communication"), 30);
        assert_eq!(relevance(&desc_only, "zzz"), 0);
    }

    #[tokio::test]
    async fn find_piece_exact_match() {
        let store = store_with_sample_data().await;
        let piece = store.find_piece("Gmail").await.unwrap().unwrap();
        assert_eq!(piece.name, "gmail");
        assert_eq!(piece.actions.len(), 1);
        assert_eq!(piece.triggers.len(), 1);
        assert_eq!(piece.categories, vec!["Communication"]);
    }

    #[tokio::test]
    async fn find_piece_falls_back_to_search() {
        let store = store_with_sample_data().await;
        let piece = store.find_piece("drive").await.unwrap().unwrap();
        assert_eq!(piece.name, "google_drive");
    }

    #[tokio::test]
    async fn find_piece_missing_returns_none() {
        let store = store_with_sample_data().await;
        assert!(store.find_piece("notion").await.unwrap().is_none());
        assert!(store.find_piece("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_actions_matches_across_pieces() {
        let store = store_with_sample_data().await;
        let matches = store.search_actions("send", 10).await.unwrap();
        assert_eq!(matches.len(), 2);
        let pieces: Vec<&str> = matches
            .iter()
            .map(|m| m.piece_display_name.as_str())
            .collect();
        assert!(pieces.contains(&"Gmail"));
        assert!(pieces.contains(&"Slack"));
    }

    #[tokio::test]
    async fn search_triggers_uses_substring_match() {
        let store = store_with_sample_data().await;
        let matches = store.search_triggers("new file", 10).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].piece_display_name, "Google Drive");
    }

    #[tokio::test]
    async fn action_inputs_ordered_required_first() {
        let store = store_with_sample_data().await;
        let inputs = store.action_inputs("Gmail", "Send Email").await.unwrap();
        assert_eq!(inputs.len(), 3);
        assert!(inputs[0].required && inputs[1].required);
        assert!(!inputs[2].required);
        assert_eq!(inputs[2].default_value.as_deref(), Some("plain"));
        assert_eq!(
            inputs[2].options,
            Some(serde_json::json!(["plain", "html"]))
        );
    }

    #[tokio::test]
    async fn trigger_inputs_resolve_by_display_name() {
        let store = store_with_sample_data().await;
        let inputs = store.trigger_inputs("gmail", "New Email").await.unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "label");
        assert_eq!(inputs[0].default_value.as_deref(), Some("INBOX"));
    }

    #[tokio::test]
    async fn stats_counts_everything() {
        let store = store_with_sample_data().await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_pieces, 3);
        assert_eq!(stats.total_actions, 2);
        assert_eq!(stats.total_triggers, 2);
    }

    #[tokio::test]
    async fn overview_lists_capabilities() {
        let store = store_with_sample_data().await;
        let overview = store.piece_overview("gmail").await.unwrap().unwrap();
        assert!(overview.contains("Send Email"));
        assert!(overview.contains("New Email"));
    }
}
