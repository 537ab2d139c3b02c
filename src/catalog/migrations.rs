use sqlx::SqlitePool;
use tracing::info;

/// Catalog schema migrations. Each statement is idempotent
/// (`IF NOT EXISTS`) so startup can run them unconditionally.
pub(crate) async fn migrate_catalog(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pieces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT,
            logo_url TEXT,
            version TEXT,
            auth_type TEXT,
            categories TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            piece_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            requires_auth INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (piece_id) REFERENCES pieces(id) ON DELETE CASCADE,
            UNIQUE(piece_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triggers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            piece_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            trigger_type TEXT,
            requires_auth INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (piece_id) REFERENCES pieces(id) ON DELETE CASCADE,
            UNIQUE(piece_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS action_properties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            property_type TEXT,
            required INTEGER NOT NULL DEFAULT 0,
            default_value TEXT,
            options TEXT,
            FOREIGN KEY (action_id) REFERENCES actions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trigger_properties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            property_type TEXT,
            required INTEGER NOT NULL DEFAULT 0,
            default_value TEXT,
            options TEXT,
            FOREIGN KEY (trigger_id) REFERENCES triggers(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pieces_name ON pieces(name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_piece_id ON actions(piece_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_name ON actions(name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_triggers_piece_id ON triggers(piece_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_triggers_name ON triggers(name)")
        .execute(pool)
        .await?;

    // Full-text search over names and descriptions, kept in sync by
    // AFTER INSERT triggers. The catalog is rebuilt wholesale on import,
    // so insert-only sync is sufficient.
    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS pieces_fts USING fts5(
            name, display_name, description,
            content='pieces', content_rowid='id'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS actions_fts USING fts5(
            name, display_name, description,
            content='actions', content_rowid='id'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS triggers_fts USING fts5(
            name, display_name, description,
            content='triggers', content_rowid='id'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS pieces_ai AFTER INSERT ON pieces BEGIN
            INSERT INTO pieces_fts(rowid, name, display_name, description)
            VALUES (new.id, new.name, new.display_name, new.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS actions_ai AFTER INSERT ON actions BEGIN
            INSERT INTO actions_fts(rowid, name, display_name, description)
            VALUES (new.id, new.name, new.display_name, new.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS triggers_ai AFTER INSERT ON triggers BEGIN
            INSERT INTO triggers_fts(rowid, name, display_name, description)
            VALUES (new.id, new.name, new.display_name, new.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS pieces_with_capabilities AS
        SELECT
            p.*,
            (SELECT COUNT(*) FROM actions WHERE piece_id = p.id) AS action_count,
            (SELECT COUNT(*) FROM triggers WHERE piece_id = p.id) AS trigger_count
        FROM pieces p
        "#,
    )
    .execute(pool)
    .await?;

    info!("Catalog migration complete");
    Ok(())
}

/// Documentation index table: one row per document with its embedding
/// stored as a flat little-endian f32 blob.
pub(crate) async fn migrate_documents(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Documents table migration complete");
    Ok(())
}
