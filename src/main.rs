mod agent;
mod builder;
mod catalog;
mod config;
mod index;
mod planner;
mod providers;
mod query;
mod responder;
mod server;
mod sessions;
mod tools;
mod traits;
mod types;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::agent::Agent;
use crate::builder::FlowBuilder;
use crate::catalog::CatalogStore;
use crate::config::AppConfig;
use crate::index::{DocIndex, EmbeddingService};
use crate::planner::QueryPlanner;
use crate::providers::OpenAiCompatibleProvider;
use crate::responder::GeneralResponder;
use crate::server::AppState;
use crate::sessions::SessionStore;
use crate::tools::{CheckPieceTool, CodeGuidelinesTool, SearchDocsTool, WebSearchTool};
use crate::traits::{ModelProvider, Tool};

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = PathBuf::from("config.toml");

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--version") | Some("-V") => {
            println!("flowmate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("--help") | Some("-h") => {
            println!("flowmate {}", env!("CARGO_PKG_VERSION"));
            println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
            println!("Usage: flowmate [COMMAND]\n");
            println!("Commands:");
            println!("  serve                   Start the assistant API server (default)");
            println!("  import-catalog <json>   Import a catalog export into the database");
            println!("  build-index             Rebuild the documentation embedding index");
            println!("\nOptions:");
            println!("  -h, --help       Print help");
            println!("  -V, --version    Print version");
            Ok(())
        }
        Some("import-catalog") => {
            let export_path = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Usage: flowmate import-catalog <export.json>"))?
                .clone();
            run_async(async move {
                let config = AppConfig::load(&config_path)?;
                let catalog = CatalogStore::open(&config.catalog.db_path).await?;
                let count =
                    catalog::import::import_file(catalog.pool(), Path::new(&export_path)).await?;
                println!("Imported {} pieces into {}", count, config.catalog.db_path);
                Ok(())
            })
        }
        Some("build-index") => run_async(async move {
            let config = AppConfig::load(&config_path)?;
            let catalog = CatalogStore::open(&config.catalog.db_path).await?;
            let index = DocIndex::new(catalog.pool().clone(), EmbeddingService::new());
            let count = index::build::rebuild(&catalog, &index).await?;
            println!("Indexed {} documents", count);
            Ok(())
        }),
        Some("serve") | None => run_async(async move { serve(&config_path).await }),
        Some(other) => {
            anyhow::bail!("Unknown command '{}'. Try: flowmate --help", other)
        }
    }
}

fn run_async<F>(fut: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(fut)
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;

    let provider: Arc<dyn ModelProvider> = Arc::new(
        OpenAiCompatibleProvider::new(&config.provider.base_url, &config.provider.api_key)
            .map_err(|e| anyhow::anyhow!(e))?,
    );

    let catalog = CatalogStore::open(&config.catalog.db_path).await?;
    let stats = catalog.stats().await?;
    if stats.total_pieces == 0 {
        tracing::warn!(
            "Catalog is empty; run `flowmate import-catalog <export.json>` to load pieces"
        );
    } else {
        tracing::info!(
            pieces = stats.total_pieces,
            actions = stats.total_actions,
            triggers = stats.total_triggers,
            "Catalog loaded"
        );
    }

    let embeddings = EmbeddingService::new();
    let index = DocIndex::new(catalog.pool().clone(), embeddings);
    if index.len().await? == 0 {
        tracing::warn!("Documentation index is empty; run `flowmate build-index` after import");
    }

    let models = &config.provider.models;
    let planner_model = if config.planner.model.is_empty() {
        models.fast.clone()
    } else {
        config.planner.model.clone()
    };
    let analysis_model = if config.builder.analysis_model.is_empty() {
        models.fast.clone()
    } else {
        config.builder.analysis_model.clone()
    };
    let guide_model = if config.builder.guide_model.is_empty() {
        models.smart.clone()
    } else {
        config.builder.guide_model.clone()
    };

    let web_search = WebSearchTool::from_config(
        &config.search,
        provider.clone(),
        models.primary.clone(),
    )?;
    let search_backend = web_search.backend();

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CheckPieceTool::new(catalog.clone())),
        Arc::new(SearchDocsTool::new(
            index.clone(),
            config.catalog.doc_search_k,
        )),
        Arc::new(web_search),
        Arc::new(CodeGuidelinesTool),
    ];
    for tool in &tools {
        tracing::debug!(tool = tool.name(), description = tool.description(), "Tool registered");
    }

    let state = AppState {
        catalog: catalog.clone(),
        sessions: SessionStore::new(config.sessions.dir.clone()),
        planner: Arc::new(QueryPlanner::new(
            provider.clone(),
            planner_model,
            config.planner.cache_size,
        )),
        agent: Arc::new(Agent::new(
            provider.clone(),
            tools,
            models.primary.clone(),
        )),
        responder: Arc::new(GeneralResponder::new(provider.clone(), models.fast.clone())),
        builder: Arc::new(FlowBuilder::new(
            provider,
            catalog,
            index,
            search_backend,
            analysis_model,
            guide_model,
            config.builder.fast_mode,
        )),
        history_limit: config.sessions.history_limit,
    };

    server::serve(
        state,
        &config.server.bind,
        config.server.port,
        &config.server.allowed_origins,
    )
    .await
}
