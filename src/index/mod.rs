//! Documentation retrieval over a flat embedding index.
//!
//! Documents live in the `documents` table with their embeddings stored
//! as little-endian f32 blobs. Search embeds the query locally and runs
//! a brute-force L2 scan over all stored vectors; the catalog is a few
//! thousand documents, well within flat-scan territory.

pub mod build;
mod binary;
pub mod embeddings;

use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::warn;

pub use binary::{decode_embedding, encode_embedding, l2_distance_sq};
pub use embeddings::EmbeddingService;

#[derive(Clone)]
pub struct DocIndex {
    pool: SqlitePool,
    embeddings: EmbeddingService,
}

/// A retrieved snippet with its metadata and L2 distance (smaller = closer).
#[derive(Debug, Clone)]
pub struct DocHit {
    pub content: String,
    pub metadata: Value,
    pub distance: f32,
}

impl DocIndex {
    pub fn new(pool: SqlitePool, embeddings: EmbeddingService) -> Self {
        Self { pool, embeddings }
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    /// Nearest-neighbor search: embed the query and return the top-k
    /// documents by L2 distance. An empty index yields an empty result.
    pub async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<DocHit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT content, metadata, embedding FROM documents")
            .fetch_all(&self.pool)
            .await?;
        // Don't pay for model init when there is nothing to rank.
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embeddings.embed(query.to_string()).await?;

        let mut hits: Vec<DocHit> = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = match decode_embedding(&blob) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping document with bad embedding: {}", e);
                    continue;
                }
            };
            if embedding.len() != query_vec.len() {
                warn!(
                    "Skipping document with mismatched embedding dimension {} (expected {})",
                    embedding.len(),
                    query_vec.len()
                );
                continue;
            }

            let metadata_text: String = row.get("metadata");
            let metadata =
                serde_json::from_str(&metadata_text).unwrap_or(Value::Object(Default::default()));

            hits.push(DocHit {
                content: row.get("content"),
                metadata,
                distance: l2_distance_sq(&query_vec, &embedding),
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Number of indexed documents.
    pub async fn len(&self) -> anyhow::Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Replace the entire index with the given (content, metadata,
    /// embedding) rows inside one transaction.
    pub async fn replace_all(
        &self,
        docs: Vec<(String, Value, Vec<f32>)>,
    ) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;

        let count = docs.len();
        for (content, metadata, embedding) in docs {
            sqlx::query("INSERT INTO documents (content, metadata, embedding) VALUES (?, ?, ?)")
                .bind(&content)
                .bind(serde_json::to_string(&metadata)?)
                .bind(encode_embedding(&embedding))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // Migrations run via the catalog store helper.
        let store = CatalogStore::from_pool(pool).await.unwrap();
        store.pool().clone()
    }

    // Embedding the query requires the local model, which tests cannot
    // download; insert rows directly and exercise the scan path through
    // the scoring helpers instead.
    #[tokio::test]
    async fn replace_all_swaps_contents() {
        let pool = test_pool().await;
        let index = DocIndex::new(pool.clone(), EmbeddingService::new());

        let first = vec![(
            "doc one".to_string(),
            json!({"kind": "piece"}),
            vec![0.0_f32; 384],
        )];
        index.replace_all(first).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);

        let second = vec![
            (
                "doc two".to_string(),
                json!({"kind": "action"}),
                vec![0.5_f32; 384],
            ),
            (
                "doc three".to_string(),
                json!({"kind": "trigger"}),
                vec![1.0_f32; 384],
            ),
        ];
        index.replace_all(second).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);

        let contents: Vec<String> = sqlx::query_scalar("SELECT content FROM documents")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(!contents.contains(&"doc one".to_string()));
    }

    #[tokio::test]
    async fn stored_blobs_roundtrip() {
        let pool = test_pool().await;
        let index = DocIndex::new(pool.clone(), EmbeddingService::new());
        let vec: Vec<f32> = (0..384).map(|i| (i as f32) / 384.0).collect();
        index
            .replace_all(vec![("doc".into(), json!({}), vec.clone())])
            .await
            .unwrap();

        let blob: Vec<u8> = sqlx::query_scalar("SELECT embedding FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(decode_embedding(&blob).unwrap(), vec);
    }
}
