use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task;
use tracing::info;

/// Embedding dimension of AllMiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Local embedding service. The model download/load is deferred to the
/// first request and runs on a blocking thread.
#[derive(Clone)]
pub struct EmbeddingService {
    model: Arc<OnceCell<Arc<TextEmbedding>>>,
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self {
            model: Arc::new(OnceCell::new()),
        }
    }

    async fn get_model(&self) -> anyhow::Result<Arc<TextEmbedding>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                task::spawn_blocking(|| {
                    let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                        .with_show_download_progress(true);
                    let model = TextEmbedding::try_new(options)?;
                    info!("Embedding model loaded (AllMiniLML6V2)");
                    Ok::<_, anyhow::Error>(Arc::new(model))
                })
                .await?
            })
            .await?;
        Ok(model.clone())
    }

    /// Compute the embedding for a single query string.
    pub async fn embed(&self, text: String) -> anyhow::Result<Vec<f32>> {
        let model = self.get_model().await?;
        task::spawn_blocking(move || {
            let embeddings = model.embed(vec![text], None)?;
            Ok(embeddings.into_iter().next().unwrap_or_default())
        })
        .await?
    }

    /// Compute embeddings for a batch of documents.
    pub async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.get_model().await?;
        task::spawn_blocking(move || model.embed(texts, None)).await?
    }
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}
