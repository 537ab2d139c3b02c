//! Flow builder: turns a flow request into a comprehensive step-by-step
//! build guide in three phases: analyze the request with the LLM,
//! search the catalog/index for matching components in parallel, then
//! generate the guide from the assembled context.

pub mod ai_pieces;

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::catalog::{CatalogStore, InputProperty, PieceDetails};
use crate::index::DocIndex;
use crate::tools::code_guidelines::guidelines_for;
use crate::tools::web_search::SearchBackend;
use crate::traits::ModelProvider;
use crate::utils::{extract_json_block, truncate_str};

pub use ai_pieces::{detect_ai_category, AiCategory, AiPieceCatalog, AiRecommendation};

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAnalysis {
    #[serde(default)]
    pub flow_goal: String,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub actions_needed: Vec<String>,
    #[serde(default = "default_true")]
    pub is_clear: bool,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default = "default_moderate")]
    pub complexity: String,
    #[serde(default = "default_medium")]
    pub confidence: String,
}

fn default_true() -> bool {
    true
}
fn default_moderate() -> String {
    "moderate".to_string()
}
fn default_medium() -> String {
    "medium".to_string()
}

impl FlowAnalysis {
    fn fallback(user_request: &str) -> Self {
        Self {
            flow_goal: user_request.to_string(),
            trigger_type: None,
            actions_needed: Vec::new(),
            is_clear: true,
            missing_info: Vec::new(),
            complexity: default_moderate(),
            confidence: default_medium(),
        }
    }

    fn has_trigger(&self) -> bool {
        matches!(&self.trigger_type, Some(t) if !t.is_empty() && t != "unclear")
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// One candidate match for an action requirement.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub piece: String,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerMatchRecord {
    pub piece: String,
    pub trigger: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    /// A catalog piece covers the requirement directly.
    Native,
    /// No direct piece, but search surfaced a usable alternative.
    Alternative,
    /// Only knowledge-base suggestions were found.
    Rag,
    /// Nothing found; fall back to HTTP request or custom code.
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    HttpRequest,
    Code,
    RagSuggestions,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyFallback {
    pub kind: FallbackKind,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionStrategy {
    pub status: StrategyStatus,
    pub recommended_piece: Option<String>,
    pub recommended_action: Option<String>,
    pub notes: Vec<String>,
    pub fallbacks: Vec<StrategyFallback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionComponent {
    pub description: String,
    pub search_term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece: Option<PieceDetails>,
    pub matches: Vec<MatchRecord>,
    #[serde(skip)]
    pub preferred: Option<AiRecommendation>,
    pub rag_suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ActionStrategy>,
    #[serde(skip)]
    pub inputs_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerComponent {
    pub piece: PieceDetails,
    pub trigger_type: String,
    pub search_terms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowComponents {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerComponent>,
    pub trigger_matches: Vec<TriggerMatchRecord>,
    pub actions: Vec<ActionComponent>,
    pub missing: Vec<String>,
    pub alternatives: Vec<MatchRecord>,
    pub knowledge_context: Vec<String>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub guide: String,
    pub analysis: FlowAnalysis,
    pub components: FlowComponents,
    pub clarifying_questions: Vec<String>,
}

impl FlowResult {
    /// The chat reply: the guide plus optional clarifications when the
    /// analysis flagged missing information.
    pub fn render_reply(&self) -> String {
        let mut reply = self.guide.clone();
        if !self.clarifying_questions.is_empty() {
            reply.push_str(
                "\n\n---\n\n**Optional Clarifications** (you can provide these for more specific guidance):\n\n",
            );
            for (i, question) in self.clarifying_questions.iter().enumerate() {
                reply.push_str(&format!("{}. {}\n", i + 1, question));
            }
        }
        reply
    }
}

// ---------------------------------------------------------------------------
// Search-term generation
// ---------------------------------------------------------------------------

/// Return the first few meaningful words from text for searching.
fn extract_keywords(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| ",-:;|".contains(c)))
        .filter(|token| !token.is_empty())
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate candidate search terms for a flow component description:
/// the full text, tails after "via"/"using"/"with"/"for", and leading/
/// trailing word windows, deduped in order.
fn generate_search_terms(text: &str) -> Vec<String> {
    let base = text.trim();
    if base.is_empty() {
        return Vec::new();
    }
    let lower = base.to_lowercase();

    let mut terms: Vec<String> = Vec::new();
    let mut push = |candidate: String, terms: &mut Vec<String>| {
        let cleaned = candidate.trim().to_string();
        if cleaned.is_empty() {
            return;
        }
        if !terms.iter().any(|t| t.eq_ignore_ascii_case(&cleaned)) {
            terms.push(cleaned);
        }
    };

    push(base.to_string(), &mut terms);

    for sep in [" via ", " using ", " with ", " for "] {
        if let Some(idx) = lower.rfind(sep) {
            push(lower[idx + sep.len()..].to_string(), &mut terms);
        }
    }

    let words: Vec<&str> = base
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| ",.;:".contains(c)))
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() >= 2 {
        push(words.iter().take(3).cloned().collect::<Vec<_>>().join(" "), &mut terms);
        push(
            words[words.len().saturating_sub(3)..].join(" "),
            &mut terms,
        );
    }

    terms
}

// ---------------------------------------------------------------------------
// FlowBuilder
// ---------------------------------------------------------------------------

pub struct FlowBuilder {
    provider: Arc<dyn ModelProvider>,
    catalog: CatalogStore,
    index: DocIndex,
    search: Arc<dyn SearchBackend>,
    ai_pieces: AiPieceCatalog,
    analysis_model: String,
    guide_model: String,
    fast_mode: bool,
    http_docs: OnceCell<String>,
}

impl FlowBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        catalog: CatalogStore,
        index: DocIndex,
        search: Arc<dyn SearchBackend>,
        analysis_model: String,
        guide_model: String,
        fast_mode: bool,
    ) -> Self {
        let ai_pieces = AiPieceCatalog::new(catalog.clone());
        Self {
            provider,
            catalog,
            index,
            search,
            ai_pieces,
            analysis_model,
            guide_model,
            fast_mode,
            http_docs: OnceCell::new(),
        }
    }

    /// Run all three phases and return the guide plus metadata.
    pub async fn build_flow(
        &self,
        user_request: &str,
        user_answers: Option<&str>,
    ) -> FlowResult {
        let analysis = self.analyze(user_request).await;
        let mut components = self.search_components(&analysis).await;
        self.determine_strategies(&mut components).await;
        let guide = self
            .build_guide(user_request, &analysis, &components, user_answers)
            .await;

        let clarifying_questions = if analysis.is_clear {
            Vec::new()
        } else {
            analysis
                .missing_info
                .iter()
                .map(|item| format!("Can you tell me more about: {}?", item))
                .collect()
        };

        FlowResult {
            guide,
            analysis,
            components,
            clarifying_questions,
        }
    }

    // --- Phase 1: analyze ---------------------------------------------------

    pub async fn analyze(&self, user_request: &str) -> FlowAnalysis {
        let prompt = analysis_prompt(user_request);
        let messages = vec![json!({"role": "user", "content": prompt})];

        match self.provider.respond(&self.analysis_model, &messages).await {
            Ok(reply) => match serde_json::from_str::<FlowAnalysis>(extract_json_block(&reply)) {
                Ok(analysis) => {
                    info!(
                        goal = %analysis.flow_goal,
                        clear = analysis.is_clear,
                        complexity = %analysis.complexity,
                        "Flow analysis"
                    );
                    analysis
                }
                Err(e) => {
                    warn!("Flow analysis parse error: {}", e);
                    FlowAnalysis::fallback(user_request)
                }
            },
            Err(e) => {
                warn!("Flow analysis error: {}", e);
                FlowAnalysis::fallback(user_request)
            }
        }
    }

    // --- Phase 2: search ----------------------------------------------------

    async fn rag_suggestions(&self, query: &str) -> Vec<String> {
        if query.is_empty() {
            return Vec::new();
        }
        match self.index.search(query, 4).await {
            Ok(hits) => hits
                .iter()
                .filter_map(|hit| {
                    let snippet = truncate_str(hit.content.trim(), 180);
                    let meta_piece = hit
                        .metadata
                        .get("piece")
                        .or_else(|| hit.metadata.get("name"))
                        .and_then(|v| v.as_str());
                    match meta_piece {
                        Some(piece) => Some(format!("{}: {}", piece, snippet)),
                        None if !snippet.is_empty() => Some(snippet),
                        None => None,
                    }
                })
                .collect(),
            Err(e) => {
                warn!("RAG suggestion error for '{}': {}", query, e);
                Vec::new()
            }
        }
    }

    pub async fn search_components(&self, analysis: &FlowAnalysis) -> FlowComponents {
        let mut components = FlowComponents::default();

        let confidence = analysis.confidence.to_lowercase();
        let should_fetch_kb =
            !self.fast_mode || confidence.is_empty() || confidence == "medium" || confidence == "low";

        // Trigger lookups: first two search terms, fanned out together.
        let trigger_terms: Vec<String> = if analysis.has_trigger() {
            generate_search_terms(analysis.trigger_type.as_deref().unwrap_or(""))
        } else {
            Vec::new()
        };

        let trigger_futs = trigger_terms.iter().take(2).map(|term| {
            let catalog = self.catalog.clone();
            let term = term.clone();
            async move {
                let piece = catalog.find_piece(&term).await.unwrap_or_else(|e| {
                    warn!("Piece lookup failed for '{}': {}", term, e);
                    None
                });
                let matches = catalog.search_triggers(&term, 8).await.unwrap_or_else(|e| {
                    warn!("Trigger search failed for '{}': {}", term, e);
                    Vec::new()
                });
                (piece, matches)
            }
        });

        // Per-action lookups: piece + action matches + RAG suggestions.
        let action_entries: Vec<(String, String)> = analysis
            .actions_needed
            .iter()
            .filter(|desc| !desc.is_empty() && !desc.starts_with("unclear"))
            .map(|desc| {
                let terms = generate_search_terms(desc);
                let primary = terms
                    .first()
                    .cloned()
                    .unwrap_or_else(|| extract_keywords(desc, 4));
                (desc.clone(), primary)
            })
            .collect();

        let action_futs = action_entries.iter().map(|(desc, primary)| {
            let catalog = self.catalog.clone();
            let desc = desc.clone();
            let primary = primary.clone();
            async move {
                let piece = catalog.find_piece(&primary).await.unwrap_or_else(|e| {
                    warn!("Piece lookup failed for '{}': {}", primary, e);
                    None
                });
                let matches = catalog.search_actions(&primary, 8).await.unwrap_or_else(|e| {
                    warn!("Action search failed for '{}': {}", primary, e);
                    Vec::new()
                });
                let rag = self.rag_suggestions(&desc).await;
                (piece, matches, rag)
            }
        });

        let kb_fut = async {
            if !should_fetch_kb {
                return Vec::new();
            }
            let mut query_parts = vec![analysis.flow_goal.clone()];
            if let Some(trigger) = &analysis.trigger_type {
                query_parts.push(trigger.clone());
            }
            query_parts.push(analysis.actions_needed.join(" "));
            let query = query_parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if query.trim().is_empty() {
                return Vec::new();
            }
            match self.index.search(&query, 3).await {
                Ok(hits) => hits.into_iter().map(|h| h.content).collect(),
                Err(e) => {
                    warn!("Knowledge base search error: {}", e);
                    Vec::new()
                }
            }
        };

        let (trigger_results, action_results, knowledge_context) = tokio::join!(
            join_all(trigger_futs),
            join_all(action_futs),
            kb_fut,
        );

        // Trigger: first term that resolved to a piece wins.
        let trigger_piece = trigger_results.iter().find_map(|(piece, _)| piece.clone());
        for (_, matches) in &trigger_results {
            for m in matches {
                components.trigger_matches.push(TriggerMatchRecord {
                    piece: m.piece_display_name.clone(),
                    trigger: m.trigger_display_name.clone(),
                    description: m.description.clone(),
                });
            }
        }

        if let Some(piece) = trigger_piece {
            components.trigger = Some(TriggerComponent {
                piece,
                trigger_type: analysis.trigger_type.clone().unwrap_or_default(),
                search_terms: trigger_terms.clone(),
            });
        } else if analysis.has_trigger() {
            components.missing.push(format!(
                "Trigger: {}",
                analysis.trigger_type.as_deref().unwrap_or("")
            ));
        }

        // Actions.
        for ((desc, primary), (piece, raw_matches, rag)) in
            action_entries.into_iter().zip(action_results)
        {
            let mut matches: Vec<MatchRecord> = raw_matches
                .into_iter()
                .map(|m| MatchRecord {
                    piece: m.piece_display_name,
                    action: m.action_display_name,
                    description: m.description,
                })
                .collect();

            let preferred = self.ai_pieces.recommend(&desc).await;
            let mut piece = piece;
            if let Some(rec) = &preferred {
                piece = piece.or_else(|| Some(rec.piece.clone()));
                let display = rec.piece.display_name.clone();
                matches.retain(|m| !m.piece.eq_ignore_ascii_case(&display));
                matches.insert(
                    0,
                    MatchRecord {
                        piece: display,
                        action: rec.action.clone(),
                        description: rec.reason.to_string(),
                    },
                );
            }

            if piece.is_none() {
                components.missing.push(format!("Action: {}", desc));
                components
                    .alternatives
                    .extend(matches.iter().take(3).cloned());
                components.alternatives.extend(rag.iter().take(3).map(|s| {
                    MatchRecord {
                        piece: "Knowledge Base Suggestion".to_string(),
                        action: String::new(),
                        description: s.clone(),
                    }
                }));
            }

            components.actions.push(ActionComponent {
                description: desc,
                search_term: primary,
                piece,
                matches,
                preferred,
                rag_suggestions: rag,
                strategy: None,
                inputs_reference: None,
            });
        }

        components.knowledge_context = knowledge_context;
        components
    }

    // --- Strategy selection -------------------------------------------------

    fn determine_action_strategy(action: &ActionComponent) -> ActionStrategy {
        let mut strategy = ActionStrategy {
            status: StrategyStatus::Custom,
            recommended_piece: None,
            recommended_action: None,
            notes: Vec::new(),
            fallbacks: Vec::new(),
        };

        if let Some(rec) = &action.preferred {
            strategy.notes.push(format!(
                "Use native Flowhub AI utility '{}' ({}) to handle: {}.",
                rec.piece.display_name, rec.action, action.description
            ));
        }

        if let Some(piece) = &action.piece {
            let display = piece.display_name.clone();
            strategy.status = StrategyStatus::Native;
            strategy.recommended_piece = Some(display.clone());

            let matching_record = action
                .matches
                .iter()
                .find(|m| m.piece.eq_ignore_ascii_case(&display));
            strategy.recommended_action = matching_record
                .map(|m| m.action.clone())
                .or_else(|| action.preferred.as_ref().map(|r| r.action.clone()))
                .or_else(|| action.matches.first().map(|m| m.action.clone()));

            strategy.notes.push(format!(
                "Use native piece '{}' to accomplish: {}.",
                display, action.description
            ));
            if action
                .preferred
                .as_ref()
                .is_some_and(|rec| {
                    matches!(rec.piece_key, "text_ai" | "utility_ai" | "image_ai" | "video_ai")
                })
            {
                strategy.notes.push(
                    "This action supports selecting OpenAI, Google Gemini, and Anthropic Claude models directly inside Flowhub."
                        .to_string(),
                );
            }
            return strategy;
        }

        if let Some(first) = action.matches.first() {
            strategy.status = StrategyStatus::Alternative;
            strategy.recommended_piece = Some(first.piece.clone());
            strategy.recommended_action = Some(first.action.clone());
            strategy.notes.push(format!(
                "No direct piece detected; consider '{}' -> '{}' for: {}.",
                first.piece, first.action, action.description
            ));
            if action.matches.len() > 1 {
                strategy.notes.push(
                    "Additional alternatives available; review other search matches for best fit."
                        .to_string(),
                );
            }
            return strategy;
        }

        if !action.rag_suggestions.is_empty() {
            strategy.status = StrategyStatus::Rag;
            strategy.notes.push(
                "Gathered alternative piece ideas from documentation search; review suggestions before custom implementation."
                    .to_string(),
            );
            strategy.fallbacks.push(StrategyFallback {
                kind: FallbackKind::RagSuggestions,
                description: action
                    .rag_suggestions
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
            return strategy;
        }

        strategy.fallbacks = vec![
            StrategyFallback {
                kind: FallbackKind::HttpRequest,
                description:
                    "Use the HTTP Request piece to call the service directly if it exposes an API."
                        .to_string(),
            },
            StrategyFallback {
                kind: FallbackKind::Code,
                description: "Build a custom code step with the Flowhub code template.".to_string(),
            },
        ];
        strategy.notes.push(
            "No direct or alternative piece found; evaluate HTTP Request or custom code options."
                .to_string(),
        );
        strategy
    }

    async fn determine_strategies(&self, components: &mut FlowComponents) {
        for action in &mut components.actions {
            let strategy = Self::determine_action_strategy(action);

            if matches!(
                strategy.status,
                StrategyStatus::Native | StrategyStatus::Alternative
            ) {
                if let (Some(piece), Some(action_name)) = (
                    strategy.recommended_piece.as_deref(),
                    strategy.recommended_action.as_deref(),
                ) {
                    action.inputs_reference =
                        Some(self.format_action_inputs(piece, action_name).await);
                }
            }

            action.strategy = Some(strategy);
        }
    }

    async fn format_action_inputs(&self, piece: &str, action: &str) -> String {
        match self.catalog.action_inputs(piece, action).await {
            Ok(inputs) if !inputs.is_empty() => format_input_properties(&inputs),
            Ok(_) => format!("No input properties documented for {} - {}.", piece, action),
            Err(e) => format!("Unable to fetch inputs for {} - {}: {}", piece, action, e),
        }
    }

    // --- Phase 3: build -----------------------------------------------------

    async fn latest_http_request_docs(&self) -> &str {
        self.http_docs
            .get_or_init(|| async {
                match self
                    .search
                    .search("Flowhub HTTP Request piece latest documentation")
                    .await
                {
                    Ok(docs) => docs,
                    Err(e) => format!("Unable to retrieve HTTP Request documentation: {}", e),
                }
            })
            .await
    }

    async fn search_for_missing_info(
        &self,
        analysis: &FlowAnalysis,
        components: &FlowComponents,
    ) -> String {
        let mut queries: Vec<String> = components
            .missing
            .iter()
            .map(|missing| format!("Flowhub {} how to configure", missing))
            .collect();
        if !analysis.flow_goal.is_empty() {
            queries.push(format!(
                "How to build {} workflow in Flowhub",
                analysis.flow_goal
            ));
        }

        let mut results = Vec::new();
        for query in queries.iter().take(2) {
            match self.search.search(query).await {
                Ok(result) => results.push(format!("Query: {}\nResult: {}\n", query, result)),
                Err(e) => warn!("Web search error: {}", e),
            }
        }

        if results.is_empty() {
            "No additional information found online.".to_string()
        } else {
            results.join("\n")
        }
    }

    async fn build_context(
        &self,
        user_request: &str,
        analysis: &FlowAnalysis,
        components: &FlowComponents,
        user_answers: Option<&str>,
    ) -> String {
        let mut parts: Vec<String> = vec![format!(
            "\nUSER REQUEST: {}\n\nFLOW ANALYSIS:\n- Goal: {}\n- Trigger: {}\n- Actions: {}\n- Complexity: {}\n\nFOUND COMPONENTS:\n",
            user_request,
            analysis.flow_goal,
            analysis.trigger_type.as_deref().unwrap_or("Unknown"),
            analysis.actions_needed.join(", "),
            analysis.complexity,
        )];

        parts.push(
            "\nFLOW BUILDING FOUNDATIONS:\n\
             - Start every flow with exactly one trigger; it controls when the flow runs.\n\
             - Add actions after the trigger in the order they should execute; each action runs sequentially and the flow finishes once the last action completes.\n\
             - Insert router steps to branch the flow; create as many branches as needed and add filters on each branch to decide when it should execute.\n\
             - Configure branch filters with AND/OR groups so the branch runs only when its conditions are met; after a branch finishes, the flow continues with any steps placed after the router.\n\
             - Use loops when you need to process every item in an array or list; the actions inside the loop repeat once per item in the input collection.\n\
             - Map outputs from previous steps, including trigger data and earlier actions, into later actions; for example, reuse Gmail trigger fields like email text or attachments anywhere downstream.\n\
             - Test each action (and the trigger) as you build to confirm authentication, inputs, and data mappings before adding the next step.\n"
                .to_string(),
        );

        if let Some(trigger) = &components.trigger {
            parts.push(format!("\nTRIGGER PIECE: {}", trigger.piece.display_name));
            parts.push(format!("  Description: {}", trigger.piece.description));
            if !trigger.piece.triggers.is_empty() {
                parts.push(format!(
                    "  Available Triggers ({}), top options:",
                    trigger.piece.triggers.len()
                ));
                for t in trigger.piece.triggers.iter().take(3) {
                    parts.push(format!("    - {}: {}", t.display_name, t.description));
                }
            }
        } else if analysis.has_trigger() {
            parts.push(format!(
                "\nWARNING: Trigger piece not confirmed for '{}'.",
                analysis.trigger_type.as_deref().unwrap_or("")
            ));
        }

        if !components.trigger_matches.is_empty() {
            parts.push("  Trigger search suggestions:".to_string());
            for m in components.trigger_matches.iter().take(5) {
                parts.push(format!("    - {} -> {}", m.piece, m.trigger));
            }
        }

        // Piece capability summaries, deduped by display name.
        let mut seen_pieces: Vec<String> = Vec::new();
        let mut overviews: Vec<String> = Vec::new();
        let mut all_pieces: Vec<&PieceDetails> = Vec::new();
        if let Some(trigger) = &components.trigger {
            all_pieces.push(&trigger.piece);
        }
        for action in &components.actions {
            if let Some(piece) = &action.piece {
                all_pieces.push(piece);
            }
        }
        for piece in all_pieces {
            let key = piece.display_name.to_lowercase();
            if seen_pieces.contains(&key) {
                continue;
            }
            seen_pieces.push(key);
            let overview = match self.catalog.piece_overview(&piece.name).await {
                Ok(Some(overview)) => overview,
                Ok(None) => continue,
                Err(e) => format!(
                    "Unable to load actions/triggers for {}: {}",
                    piece.display_name, e
                ),
            };
            overviews.push(format!(
                "\n=== {} Actions & Triggers ===\n{}",
                piece.display_name, overview
            ));
        }
        if !overviews.is_empty() {
            parts.push("\nPIECE CAPABILITY SUMMARIES:".to_string());
            parts.extend(overviews);
        }

        // AI utility highlights.
        let ai_highlights: Vec<String> = components
            .actions
            .iter()
            .filter_map(|action| {
                let rec = action.preferred.as_ref()?;
                Some(format!(
                    "  - {} -> {} ({})",
                    rec.piece.display_name, rec.action, rec.reason
                ))
            })
            .collect();
        if !ai_highlights.is_empty() {
            parts.push("\nFLOWHUB AI UTILITIES SELECTED:".to_string());
            parts.extend(ai_highlights);
        }

        // Action strategies.
        let mut needs_http_fallback = false;
        let mut needs_code_fallback = false;
        let mut strategy_sections: Vec<String> = Vec::new();

        for action in &components.actions {
            let Some(strategy) = &action.strategy else {
                continue;
            };
            let mut lines = vec![
                format!("\n-> Desired Action: {}", action.description),
                format!("  Status: {:?}", strategy.status),
            ];
            for note in &strategy.notes {
                lines.push(format!("  Note: {}", note));
            }
            for fallback in &strategy.fallbacks {
                match fallback.kind {
                    FallbackKind::HttpRequest => needs_http_fallback = true,
                    FallbackKind::Code => needs_code_fallback = true,
                    FallbackKind::RagSuggestions => {}
                }
                lines.push(format!("  Fallback: {:?}: {}", fallback.kind, fallback.description));
            }
            if !action.rag_suggestions.is_empty() {
                lines.push("  Knowledge Base Alternatives:".to_string());
                for suggestion in action.rag_suggestions.iter().take(3) {
                    lines.push(format!("    - {}", suggestion));
                }
            }
            if let Some(inputs) = &action.inputs_reference {
                lines.push(format!(
                    "  Input Reference ({} - {}):\n{}",
                    strategy.recommended_piece.as_deref().unwrap_or("?"),
                    strategy.recommended_action.as_deref().unwrap_or("?"),
                    inputs
                ));
            }
            strategy_sections.push(lines.join("\n"));
        }

        if !strategy_sections.is_empty() {
            parts.push("\nACTION STRATEGIES:".to_string());
            parts.extend(strategy_sections);
        }

        if needs_http_fallback {
            let mut http_reference = None;
            for candidate in ["HTTP", "HTTP Request"] {
                let rendered = self.format_action_inputs(candidate, "Make Request").await;
                if !rendered.starts_with("Unable") && !rendered.starts_with("No input") {
                    http_reference = Some(rendered);
                    break;
                }
            }
            if let Some(reference) = http_reference {
                parts.push(format!("\nHTTP REQUEST FALLBACK INPUTS:\n{}", reference));
            }

            let docs = self.latest_http_request_docs().await;
            parts.push(format!(
                "\nHTTP REQUEST LATEST DOCS:\n{}",
                truncate_str(docs.trim(), 800)
            ));
        }

        if needs_code_fallback {
            parts.push(format!(
                "\nCUSTOM CODE GUIDANCE (excerpt):\n{}",
                truncate_str(guidelines_for("api_call").trim(), 1200)
            ));
        }

        if !components.knowledge_context.is_empty() {
            parts.push("\nADDITIONAL CONTEXT FROM KNOWLEDGE BASE:".to_string());
            for item in components.knowledge_context.iter().take(2) {
                parts.push(format!("  - {}", truncate_str(item.trim(), 220)));
            }
        }

        if let Some(answers) = user_answers {
            parts.push(format!("\nUSER PROVIDED ADDITIONAL INFO:\n{}", answers));
        }

        if !components.missing.is_empty() {
            parts.push("\nMISSING/UNCLEAR COMPONENTS:".to_string());
            for missing in &components.missing {
                parts.push(format!("  - {}", missing));
            }
        }

        parts.join("\n")
    }

    pub async fn build_guide(
        &self,
        user_request: &str,
        analysis: &FlowAnalysis,
        components: &FlowComponents,
        user_answers: Option<&str>,
    ) -> String {
        let context = self
            .build_context(user_request, analysis, components, user_answers)
            .await;
        let mut prompt = guide_prompt(&context);

        let confidence = analysis.confidence.to_lowercase();
        if !components.missing.is_empty() || confidence == "low" {
            let research = self.search_for_missing_info(analysis, components).await;
            prompt.push_str(&format!("\n\nADDITIONAL RESEARCH FROM WEB:\n{}\n", research));
        }

        // Clear, simple requests in fast mode go to the cheaper model.
        let complexity = analysis.complexity.to_lowercase();
        let model = if self.fast_mode && complexity == "simple" && confidence == "high" {
            &self.analysis_model
        } else {
            &self.guide_model
        };

        let messages = vec![json!({"role": "user", "content": prompt})];
        match self.provider.respond(model, &messages).await {
            Ok(guide) => {
                info!(length = guide.len(), "Comprehensive flow guide generated");
                guide.trim().to_string()
            }
            Err(e) => {
                warn!("Guide generation error, using basic plan: {}", e);
                basic_plan(user_request, analysis, components)
            }
        }
    }
}

/// Render input properties the way guides present them: required flag,
/// type, description, default, and options per line.
fn format_input_properties(inputs: &[InputProperty]) -> String {
    let mut out = String::new();
    for prop in inputs {
        out.push_str(&format!(
            "  - {} ({}, {})",
            prop.display_name,
            prop.property_type,
            if prop.required { "Required" } else { "Optional" }
        ));
        if !prop.description.is_empty() {
            out.push_str(&format!(" — {}", prop.description));
        }
        if let Some(default) = &prop.default_value {
            out.push_str(&format!(" [default: {}]", default));
        }
        if let Some(options) = &prop.options {
            out.push_str(&format!(" [options: {}]", options));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Deterministic outline used when guide generation fails.
fn basic_plan(user_request: &str, analysis: &FlowAnalysis, components: &FlowComponents) -> String {
    let goal = if analysis.flow_goal.is_empty() {
        user_request
    } else {
        &analysis.flow_goal
    };

    let mut plan = format!("# Flowhub Flow Building Guide: {}\n\n", goal);
    plan.push_str(
        "This guide will help you build this automation workflow in Flowhub, a workflow automation platform.\n\n",
    );
    plan.push_str(&format!("## Overview\n{}\n\n", goal));

    if let Some(trigger) = &components.trigger {
        plan.push_str("## Trigger Setup\n");
        plan.push_str(&format!(
            "1. Use the **{}** piece\n2. Select the appropriate trigger\n3. Configure the trigger settings\n\n",
            trigger.piece.display_name
        ));
    }

    if !components.actions.is_empty() {
        plan.push_str("## Actions\n");
        for (i, action) in components.actions.iter().enumerate() {
            if let Some(piece) = &action.piece {
                plan.push_str(&format!(
                    "{}. **{}**: {}\n",
                    i + 1,
                    piece.display_name,
                    action.description
                ));
            }
        }
    }

    plan.push_str("\n## Next Steps\n");
    plan.push_str("1. Log into your Flowhub instance\n");
    plan.push_str("2. Create a new flow in the Flowhub visual flow builder\n");
    plan.push_str("3. Add and configure the trigger\n");
    plan.push_str("4. Add and configure the actions\n");
    plan.push_str("5. Test your flow\n");
    plan
}

fn analysis_prompt(user_request: &str) -> String {
    format!(
        r#"You are an expert workflow automation analyst for Flowhub, a powerful workflow automation platform.

IMPORTANT: This analysis is for building automation workflows in Flowhub - a visual workflow builder where users connect different services and applications.

You have access to a comprehensive Flowhub catalog of pieces (integrations like Gmail, Slack, Google Sheets, etc.), actions (operations a flow can perform), and triggers (events that start a flow), with complete metadata including all input properties and configurations.

Analyze this Flowhub flow building request and determine:
1. What the user wants to accomplish (trigger -> actions)
2. What information is clear vs unclear
3. The complexity level of the flow

User Request: "{user_request}"

Respond in this exact JSON format:
{{
  "flow_goal": "brief description of what user wants to accomplish",
  "trigger_type": "identified trigger or 'unclear'",
  "actions_needed": ["action 1", "action 2"],
  "is_clear": true,
  "missing_info": ["piece 1", "piece 2"],
  "complexity": "simple|moderate|complex",
  "confidence": "high|medium|low"
}}

Examples:

Request: "I want to send an email when a new file is added to Google Drive"
{{
  "flow_goal": "Send email notification when new file added to Google Drive",
  "trigger_type": "Google Drive - New File",
  "actions_needed": ["Send Email"],
  "is_clear": true,
  "missing_info": [],
  "complexity": "simple",
  "confidence": "high"
}}

Request: "Automate my customer onboarding"
{{
  "flow_goal": "Automate customer onboarding process",
  "trigger_type": "unclear",
  "actions_needed": ["unclear - depends on onboarding steps"],
  "is_clear": false,
  "missing_info": ["trigger source", "onboarding steps", "tools used"],
  "complexity": "complex",
  "confidence": "low"
}}

Now analyze the user's request above."#,
        user_request = user_request
    )
}

fn guide_prompt(context: &str) -> String {
    format!(
        r#"You are an expert Flowhub workflow architect. Create a COMPREHENSIVE, DETAILED, and ACTIONABLE flow building guide for the Flowhub automation platform.

ABOUT FLOWHUB:
Flowhub is a powerful workflow automation platform (similar to Zapier or Make.com) that allows users to build automated workflows by connecting different services and applications. Users create flows in the Flowhub visual flow builder by:
1. Adding a trigger (what starts the flow)
2. Adding actions (what happens when the flow runs)
3. Connecting pieces (integrations) together
4. Mapping data between steps

Your guide should help users build this flow directly in their Flowhub instance.

{context}

IMPORTANT FLOWHUB FLOW BUILDER RULES:
- ALWAYS specify that this is for building in the Flowhub platform
- ALWAYS use native Flowhub AI utilities (Text AI, Utility AI, Image AI, Video AI) for AI tasks. They provide direct access to OpenAI, Google Gemini, and Anthropic Claude models without custom API calls.
- When the user names a specific model, explain how to select that model inside the relevant Flowhub action instead of building an HTTP request.
- The catalog provides comprehensive information about all Flowhub pieces - leverage this for accurate guidance.
- All action/trigger input properties are documented in the catalog - include them in your guides.
- Only suggest HTTP Request or custom code after confirming no native or alternative Flowhub piece exists and documenting the knowledge-base suggestions you've already checked.
- Always remind users that they're building this in their Flowhub instance

Create a powerful, step-by-step guide that includes:

**START YOUR GUIDE WITH:**
A clear introduction stating: "This guide will help you build [flow description] in Flowhub, a workflow automation platform."

**THEN INCLUDE:**
1. **Flow Overview** - What this Flowhub flow does and why
2. **Prerequisites** - What the user needs before starting (Flowhub account, required integrations, etc.)
3. **Step-by-Step Instructions** - DETAILED steps with ALL required inputs for building in Flowhub
4. **Trigger Configuration** - Exact settings in Flowhub, all input fields, authentication
5. **Action Configuration** - For EACH Flowhub action, list ALL inputs (required & optional)
6. **Testing & Validation** - How to test the flow in Flowhub
7. **Common Issues & Solutions** - Potential problems and fixes specific to Flowhub
8. **Pro Tips** - Advanced configurations or optimizations in Flowhub

CRITICAL REQUIREMENTS:
- Always mention that this is for the Flowhub platform
- List ALL input properties for each trigger/action (don't say "configure" - tell them EXACTLY what to configure in Flowhub)
- Include authentication requirements specific to Flowhub
- Provide example values where helpful
- Be specific about data mapping between steps in Flowhub
- Reference the Flowhub visual flow builder interface
- If information is missing, search online or provide best practices
- Make it so detailed that a beginner can build this flow in Flowhub perfectly

Format your response in clear markdown with headers, bullet points, and code blocks where appropriate.
Make this the MOST COMPREHENSIVE Flowhub flow guide possible - the user should be able to build this flow in their Flowhub instance by following your guide step-by-step."#,
        context = context
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::store_with_sample_data;
    use crate::index::{DocIndex, EmbeddingService};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    use crate::traits::ProviderResponse;

    struct SequenceProvider {
        responses: Mutex<Vec<String>>,
    }

    impl SequenceProvider {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for SequenceProvider {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Value],
            _tools: &[Value],
        ) -> anyhow::Result<ProviderResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = if responses.is_empty() {
                "{}".to_string()
            } else {
                responses.remove(0)
            };
            Ok(ProviderResponse {
                content: Some(content),
                tool_calls: Vec::new(),
                usage: None,
            })
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchBackend for NoSearch {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            Ok("no results".to_string())
        }
    }

    async fn builder_with(provider: Arc<dyn ModelProvider>) -> FlowBuilder {
        let catalog = store_with_sample_data().await;
        let index = DocIndex::new(catalog.pool().clone(), EmbeddingService::new());
        FlowBuilder::new(
            provider,
            catalog,
            index,
            Arc::new(NoSearch),
            "fast".into(),
            "smart".into(),
            true,
        )
    }

    #[test]
    fn search_terms_cover_tails_and_windows() {
        let terms = generate_search_terms("Send a summary via Slack");
        assert_eq!(terms[0], "Send a summary via Slack");
        assert!(terms.iter().any(|t| t == "slack"));
        assert!(terms.iter().any(|t| t == "Send a summary"));
    }

    #[test]
    fn search_terms_dedupe_case_insensitively() {
        let terms = generate_search_terms("Slack");
        assert_eq!(terms, vec!["Slack"]);
    }

    #[test]
    fn extract_keywords_takes_leading_words() {
        assert_eq!(
            extract_keywords("send, the: email- now please", 3),
            "send the email"
        );
    }

    #[test]
    fn strategy_native_when_piece_found() {
        let action = ActionComponent {
            description: "Send Email".into(),
            search_term: "send email".into(),
            piece: Some(PieceDetails {
                name: "gmail".into(),
                display_name: "Gmail".into(),
                description: String::new(),
                auth_type: None,
                categories: vec![],
                actions: vec![],
                triggers: vec![],
            }),
            matches: vec![MatchRecord {
                piece: "Gmail".into(),
                action: "Send Email".into(),
                description: String::new(),
            }],
            preferred: None,
            rag_suggestions: vec![],
            strategy: None,
            inputs_reference: None,
        };
        let strategy = FlowBuilder::determine_action_strategy(&action);
        assert_eq!(strategy.status, StrategyStatus::Native);
        assert_eq!(strategy.recommended_piece.as_deref(), Some("Gmail"));
        assert_eq!(strategy.recommended_action.as_deref(), Some("Send Email"));
    }

    #[test]
    fn strategy_alternative_from_matches() {
        let action = ActionComponent {
            description: "post to chat".into(),
            search_term: "post chat".into(),
            piece: None,
            matches: vec![MatchRecord {
                piece: "Slack".into(),
                action: "Send Message".into(),
                description: String::new(),
            }],
            preferred: None,
            rag_suggestions: vec![],
            strategy: None,
            inputs_reference: None,
        };
        let strategy = FlowBuilder::determine_action_strategy(&action);
        assert_eq!(strategy.status, StrategyStatus::Alternative);
        assert_eq!(strategy.recommended_piece.as_deref(), Some("Slack"));
    }

    #[test]
    fn strategy_custom_carries_http_and_code_fallbacks() {
        let action = ActionComponent {
            description: "sync to a mainframe".into(),
            search_term: "mainframe".into(),
            piece: None,
            matches: vec![],
            preferred: None,
            rag_suggestions: vec![],
            strategy: None,
            inputs_reference: None,
        };
        let strategy = FlowBuilder::determine_action_strategy(&action);
        assert_eq!(strategy.status, StrategyStatus::Custom);
        let kinds: Vec<FallbackKind> = strategy.fallbacks.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FallbackKind::HttpRequest));
        assert!(kinds.contains(&FallbackKind::Code));
    }

    #[tokio::test]
    async fn analysis_parse_failure_falls_back() {
        let provider = SequenceProvider::new(vec!["not json at all"]);
        let builder = builder_with(provider).await;
        let analysis = builder.analyze("do the thing").await;
        assert_eq!(analysis.flow_goal, "do the thing");
        assert_eq!(analysis.complexity, "moderate");
    }

    #[tokio::test]
    async fn search_components_finds_trigger_and_action() {
        let provider = SequenceProvider::new(vec![]);
        let builder = builder_with(provider).await;
        let analysis = FlowAnalysis {
            flow_goal: "email on new drive file".into(),
            trigger_type: Some("Google Drive".into()),
            actions_needed: vec!["Send Email".into()],
            is_clear: true,
            missing_info: vec![],
            complexity: "simple".into(),
            confidence: "high".into(),
        };
        let components = builder.search_components(&analysis).await;

        let trigger = components.trigger.expect("trigger piece resolved");
        assert_eq!(trigger.piece.display_name, "Google Drive");
        assert_eq!(components.actions.len(), 1);
        assert!(components.actions[0].piece.is_some());
        assert!(components.missing.is_empty());
    }

    #[tokio::test]
    async fn unclear_actions_are_skipped() {
        let provider = SequenceProvider::new(vec![]);
        let builder = builder_with(provider).await;
        let analysis = FlowAnalysis {
            flow_goal: "automate onboarding".into(),
            trigger_type: Some("unclear".into()),
            actions_needed: vec!["unclear - depends on onboarding steps".into()],
            is_clear: false,
            missing_info: vec!["trigger source".into()],
            complexity: "complex".into(),
            confidence: "low".into(),
        };
        let components = builder.search_components(&analysis).await;
        assert!(components.trigger.is_none());
        assert!(components.actions.is_empty());
        // "unclear" trigger type is not reported missing either.
        assert!(components.missing.is_empty());
    }

    #[tokio::test]
    async fn build_flow_produces_guide_and_questions() {
        let analysis_json = r#"{
            "flow_goal": "Automate onboarding",
            "trigger_type": "unclear",
            "actions_needed": [],
            "is_clear": false,
            "missing_info": ["trigger source", "tools used"],
            "complexity": "complex",
            "confidence": "low"
        }"#;
        let provider = SequenceProvider::new(vec![analysis_json, "# The Guide\nSteps..."]);
        let builder = builder_with(provider).await;

        let result = builder.build_flow("automate my onboarding", None).await;
        assert!(result.guide.starts_with("# The Guide"));
        assert_eq!(result.clarifying_questions.len(), 2);

        let reply = result.render_reply();
        assert!(reply.contains("Optional Clarifications"));
        assert!(reply.contains("trigger source"));
    }

    #[tokio::test]
    async fn guide_failure_yields_basic_plan() {
        // Analysis parses, then guide generation returns empty content
        // (provider runs out of scripted replies and returns "{}" which is
        // fine), so force an error path by making the second reply empty.
        struct FailingSecond {
            calls: Mutex<usize>,
        }

        #[async_trait]
        impl ModelProvider for FailingSecond {
            async fn chat(
                &self,
                _model: &str,
                _messages: &[Value],
                _tools: &[Value],
            ) -> anyhow::Result<ProviderResponse> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Ok(ProviderResponse {
                        content: Some(
                            r#"{"flow_goal": "send email on new file", "trigger_type": "Google Drive", "actions_needed": ["Send Email"], "is_clear": true, "complexity": "simple", "confidence": "high"}"#
                                .to_string(),
                        ),
                        tool_calls: Vec::new(),
                        usage: None,
                    })
                } else {
                    anyhow::bail!("provider down")
                }
            }
        }

        let provider = Arc::new(FailingSecond {
            calls: Mutex::new(0),
        });
        let builder = builder_with(provider).await;
        let result = builder.build_flow("email me on new drive files", None).await;
        assert!(result.guide.contains("Flowhub Flow Building Guide"));
        assert!(result.guide.contains("Google Drive"));
    }
}
