use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub models: ModelsConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    /// Model driving the tool-calling agent loop.
    #[serde(default)]
    pub primary: String,
    /// Cheaper model for planning and flow analysis.
    #[serde(default)]
    pub fast: String,
    /// Stronger model for comprehensive guide generation.
    #[serde(default)]
    pub smart: String,
}

impl ModelsConfig {
    /// Fill in unset model tiers. `fast` and `smart` default to `primary`.
    pub fn apply_defaults(&mut self) {
        if self.primary.is_empty() {
            self.primary = "gpt-4o".to_string();
        }
        if self.fast.is_empty() {
            self.fast = self.primary.clone();
        }
        if self.smart.is_empty() {
            self.smart = self.primary.clone();
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind to (default: "127.0.0.1").
    /// Set to "0.0.0.0" to listen on all interfaces.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// CORS origins. Defaults cover common local dev servers; override
    /// in production (or via the ALLOWED_ORIGINS env var).
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".into(),
        "http://localhost:3000".into(),
        "http://localhost:5000".into(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Top-k snippets returned by documentation search.
    #[serde(default = "default_doc_search_k")]
    pub doc_search_k: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            doc_search_k: default_doc_search_k(),
        }
    }
}

fn default_db_path() -> String {
    "data/flowhub.db".to_string()
}

fn default_doc_search_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_sessions_dir")]
    pub dir: String,
    /// Recent messages replayed for routing and responder context.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_sessions_dir(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_sessions_dir() -> String {
    "data/chat_sessions".to_string()
}

fn default_history_limit() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    /// Model for LLM-generated execution plans. Empty = provider fast tier.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_plan_cache_size")]
    pub cache_size: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            cache_size: default_plan_cache_size(),
        }
    }
}

fn default_plan_cache_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuilderConfig {
    /// Model for flow analysis. Empty = provider fast tier.
    #[serde(default)]
    pub analysis_model: String,
    /// Model for guide generation. Empty = provider smart tier.
    #[serde(default)]
    pub guide_model: String,
    /// Fast mode trims knowledge-base lookups and prompt verbosity for
    /// clear, high-confidence requests.
    #[serde(default = "default_fast_mode")]
    pub fast_mode: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            analysis_model: String::new(),
            guide_model: String::new(),
            fast_mode: default_fast_mode(),
        }
    }
}

fn default_fast_mode() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub backend: SearchBackendKind,
    /// API key for the Perplexity backend. The OpenAI backend reuses the
    /// provider credentials.
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackendKind {
    #[default]
    Openai,
    Perplexity,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.provider.models.apply_defaults();
        Ok(config)
    }

    /// Environment variables take precedence over the config file so
    /// deployments can keep secrets out of it.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.provider.api_key = key;
            }
        }
        if let Ok(key) = std::env::var("PERPLEXITY_API_KEY") {
            if !key.is_empty() {
                self.search.api_key = key;
            }
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.server.allowed_origins = parsed;
            }
        }
    }
}
