//! Query planning: pre-computes an execution plan that is rendered into
//! the agent input as extra instructions.
//!
//! Two fast paths (existence-style and configuration-style questions)
//! produce fixed single-tool plans with no LLM call; everything else
//! asks the planner model for a JSON plan. Plans are cached per
//! (model, lowercased query). The plan is advisory: nothing enforces
//! it beyond the agent's own iteration cap.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::traits::ModelProvider;
use crate::utils::extract_json_block;

const SIMPLE_LOOKUP_KEYWORDS: &[&str] = &[
    "available",
    "exist",
    "exists",
    "support",
    "supported",
    "have",
    "integration",
    "piece",
    "trigger",
    "action",
    "connector",
];
const SIMPLE_LOOKUP_VERBS: &[&str] = &["is", "does", "do", "can", "are", "was"];
const DETAIL_KEYWORDS: &[&str] = &[
    "input",
    "field",
    "property",
    "parameter",
    "configuration",
    "configure",
    "setup",
    "set up",
    "mapping",
    "settings",
];
const ACTION_TERMS: &[&str] = &["action", "trigger", "step", "task", "piece"];
const MAX_SIMPLE_LOOKUP_LENGTH: usize = 140;
const MAX_DETAIL_LOOKUP_LENGTH: usize = 260;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub action_plan: Vec<String>,
    #[serde(default)]
    pub recommended_tools: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default)]
    pub stopping_condition: String,
    #[serde(default)]
    pub fallback_strategy: String,
    #[serde(default)]
    pub context: String,
}

fn default_max_tool_calls() -> u32 {
    3
}

pub struct QueryPlanner {
    provider: Arc<dyn ModelProvider>,
    model: String,
    cache: Mutex<LruCache<String, Plan>>,
}

impl QueryPlanner {
    pub fn new(provider: Arc<dyn ModelProvider>, model: String, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("nonzero cache size");
        Self {
            provider,
            model,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Analyze a query and produce an execution plan.
    pub async fn analyze(&self, user_query: &str) -> Plan {
        let normalized = user_query.trim();
        if normalized.is_empty() {
            return fallback_plan(user_query);
        }

        let cache_key = format!("{}:{}", self.model, normalized.to_lowercase());
        if let Some(plan) = self.cache.lock().unwrap().get(&cache_key) {
            info!("Planner cache hit");
            return plan.clone();
        }

        if let Some(plan) = fast_plan(normalized) {
            info!("Planner fast path used (no LLM call)");
            self.cache.lock().unwrap().put(cache_key, plan.clone());
            return plan;
        }

        let plan = match self.plan_with_llm(normalized).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Planner error, using fallback plan: {}", e);
                fallback_plan(normalized)
            }
        };
        self.cache.lock().unwrap().put(cache_key, plan.clone());
        plan
    }

    async fn plan_with_llm(&self, query: &str) -> anyhow::Result<Plan> {
        let prompt = planning_prompt(query);
        let messages = vec![json!({"role": "user", "content": prompt})];
        let reply = self.provider.respond(&self.model, &messages).await?;
        let payload = extract_json_block(&reply);
        let plan: Plan = serde_json::from_str(payload)?;

        info!(
            intent = %plan.intent,
            query_type = %plan.query_type,
            steps = plan.action_plan.len(),
            "Planner output"
        );
        Ok(plan)
    }
}

fn looks_like_simple_lookup(query_lower: &str) -> bool {
    if query_lower.len() > MAX_SIMPLE_LOOKUP_LENGTH {
        return false;
    }
    if SIMPLE_LOOKUP_KEYWORDS.iter().any(|k| query_lower.contains(k)) {
        return true;
    }
    if query_lower.ends_with('?') {
        let head = query_lower.split('?').next().unwrap_or("");
        if head.matches(' ').count() <= 8 {
            return true;
        }
    }
    SIMPLE_LOOKUP_VERBS
        .iter()
        .any(|verb| query_lower.starts_with(&format!("{} ", verb)))
}

fn looks_like_detail_lookup(query_lower: &str) -> bool {
    if query_lower.len() > MAX_DETAIL_LOOKUP_LENGTH {
        return false;
    }
    if !DETAIL_KEYWORDS.iter().any(|k| query_lower.contains(k)) {
        return false;
    }
    ACTION_TERMS.iter().any(|t| query_lower.contains(t))
}

/// Build a fixed plan when the query matches a fast-path shape.
fn fast_plan(query: &str) -> Option<Plan> {
    let normalized = query.trim();
    if normalized.is_empty() {
        return None;
    }
    let lowered = normalized.to_lowercase();
    if looks_like_simple_lookup(&lowered) {
        return Some(simple_lookup_plan(normalized));
    }
    if looks_like_detail_lookup(&lowered) {
        return Some(detail_lookup_plan(normalized));
    }
    None
}

fn simple_lookup_plan(query: &str) -> Plan {
    Plan {
        intent: format!("Verify if '{}' is available in Flowhub", query),
        query_type: "simple_check".to_string(),
        action_plan: vec![
            "Step 1: Call check_piece once using the exact query. SUCCESS = piece/action/trigger details returned. MAX ATTEMPTS = 1".to_string(),
            "Step 2: If a result is found, summarize the key info (name, description, count of actions/triggers) and STOP immediately after responding.".to_string(),
            "Step 3: If nothing is found, inform the user it's unavailable and suggest using HTTP request/webhook as alternatives.".to_string(),
        ],
        recommended_tools: vec!["check_piece".to_string()],
        search_queries: vec![query.to_string()],
        max_tool_calls: 1,
        stopping_condition:
            "After a single check_piece call, respond with the findings or state that it is unavailable."
                .to_string(),
        fallback_strategy:
            "If the catalog lookup fails, explain the issue and suggest manually checking the Flowhub UI."
                .to_string(),
        context: "Auto-generated fast path plan (no LLM planning call).".to_string(),
    }
}

fn detail_lookup_plan(query: &str) -> Plan {
    Plan {
        intent: format!("Gather configuration details for '{}'", query),
        query_type: "configuration".to_string(),
        action_plan: vec![
            "Step 1: Use search_piece_docs once with the query. SUCCESS = list all input properties with types and requirements. MAX ATTEMPTS = 1".to_string(),
            "Step 2: Summarize required/optional fields, types, and notable defaults. STOP immediately after summarizing.".to_string(),
            "Step 3: If details remain unclear, note the gaps and recommend checking the Flowhub UI.".to_string(),
        ],
        recommended_tools: vec!["search_piece_docs".to_string()],
        search_queries: vec![query.to_string()],
        max_tool_calls: 1,
        stopping_condition:
            "After one documentation search call, respond with the gathered details (or note missing info)."
                .to_string(),
        fallback_strategy:
            "If doc search fails, provide general guidance using known best practices and suggest checking the UI."
                .to_string(),
        context: "Auto-generated fast path plan for configuration-style queries.".to_string(),
    }
}

fn fallback_plan(query: &str) -> Plan {
    Plan {
        intent: "Process user query".to_string(),
        query_type: "general".to_string(),
        action_plan: vec![
            "Analyze the user query".to_string(),
            "Use appropriate tools to find information".to_string(),
            "Provide a comprehensive response".to_string(),
        ],
        recommended_tools: vec!["check_piece".to_string(), "search_piece_docs".to_string()],
        search_queries: vec![query.to_string()],
        max_tool_calls: 3,
        stopping_condition: "Stop when you have enough info to answer".to_string(),
        fallback_strategy: String::new(),
        context: "Fallback plan - process query normally".to_string(),
    }
}

fn planning_prompt(query: &str) -> String {
    format!(
        r#"You are a query analyzer for a Flowhub AI assistant. Your role is to analyze user queries and create CLEAR, SPECIFIC, and EFFICIENT plans that prevent the agent from getting stuck or making redundant searches.

Flowhub is a workflow automation platform (like Zapier). The assistant has these capabilities:
- A catalog of pieces (integrations) with their actions and triggers
- Tools: check_piece (catalog search), search_piece_docs (semantic search), web_search (general info)

CRITICAL PLANNING RULES:
1. Each step must have a CLEAR SUCCESS CRITERION - when to move to next step
2. Specify MAXIMUM tool calls per step (usually 1-2)
3. Define what "good enough" information looks like
4. Add fallback actions if a tool fails
5. Tell agent explicitly when to STOP and respond

Analyze this user query and provide a structured plan:
"{query}"

You must respond in this exact JSON format:
{{
  "intent": "brief description of what user wants",
  "query_type": "simple_check|flow_building|explanation|troubleshooting|configuration",
  "action_plan": [
    "step 1: SPECIFIC action with SUCCESS CRITERION and MAX ATTEMPTS",
    "step 2: SPECIFIC action with SUCCESS CRITERION and MAX ATTEMPTS"
  ],
  "recommended_tools": ["tool1", "tool2"],
  "search_queries": ["specific query 1", "specific query 2"],
  "max_tool_calls": 3,
  "stopping_condition": "clear condition that tells agent when it has enough info to respond",
  "fallback_strategy": "what to do if tools fail or return incomplete data",
  "context": "any additional context or considerations"
}}

Examples:

Query: "Is Gmail available in Flowhub?"
{{
  "intent": "Check if Gmail integration exists",
  "query_type": "simple_check",
  "action_plan": [
    "Step 1: Use check_piece('Gmail') ONCE. SUCCESS = piece found with name and basic info. MAX ATTEMPTS = 1",
    "Step 2: If found, immediately respond with piece name, description, and count of actions/triggers. STOP after responding.",
    "Step 3: If NOT found in step 1, respond immediately that it doesn't exist. STOP."
  ],
  "recommended_tools": ["check_piece"],
  "search_queries": ["Gmail"],
  "max_tool_calls": 1,
  "stopping_condition": "After 1 check_piece call, you have enough info to answer. Do NOT search docs unless explicitly asked.",
  "fallback_strategy": "If the catalog fails, respond that you cannot verify but suggest the user check Flowhub directly.",
  "context": "Simple existence check. ONE tool call maximum. Respond immediately after."
}}

Query: "I want to send an email when a new file is added to Google Drive"
{{
  "intent": "Build a workflow that triggers on new Google Drive file and sends an email",
  "query_type": "flow_building",
  "action_plan": [
    "Step 1: Search 'Google Drive new file trigger input properties' ONCE in docs. SUCCESS = found trigger name + required inputs. MAX ATTEMPTS = 1",
    "Step 2: Search 'send email action input properties' ONCE in docs. SUCCESS = found action name + required inputs (to, subject, body). MAX ATTEMPTS = 1",
    "Step 3: STOP after 2 searches. Compile the information into a clear flow: Trigger Setup then Action Setup with ALL inputs listed.",
    "Step 4: If any search returns incomplete data, use what you have and note what's missing. Do NOT repeat searches."
  ],
  "recommended_tools": ["search_piece_docs"],
  "search_queries": ["Google Drive new file trigger configuration", "send email action configuration"],
  "max_tool_calls": 2,
  "stopping_condition": "After 2 doc searches (1 for trigger, 1 for action), STOP and respond with available information. Do NOT make additional searches.",
  "fallback_strategy": "If searches return partial data, provide what you have and suggest the user check the Flowhub UI for complete details.",
  "context": "Flow building requires trigger + action. Limit to 2 searches total. Provide what you find, don't chase perfection."
}}

Query: "How do I use webhooks in Flowhub?"
{{
  "intent": "Understand how to use webhooks feature",
  "query_type": "explanation",
  "action_plan": [
    "Step 1: Search 'webhooks Flowhub' ONCE in docs. SUCCESS = found webhook trigger/action info. MAX ATTEMPTS = 1",
    "Step 2: STOP after 1 search. Provide explanation based on what you found.",
    "Step 3: If search returns nothing, use general webhook knowledge and note that specific Flowhub webhook docs weren't found."
  ],
  "recommended_tools": ["search_piece_docs"],
  "search_queries": ["webhooks Flowhub trigger action"],
  "max_tool_calls": 1,
  "stopping_condition": "After 1 doc search, STOP and provide explanation. Do NOT search multiple times.",
  "fallback_strategy": "If no specific docs found, explain webhooks generally and suggest checking the Flowhub documentation.",
  "context": "Explanation question. ONE search maximum. Explain based on results, don't keep searching."
}}

Now analyze the user query above and provide the plan."#,
        query = query
    )
}

/// Render a plan as the instruction block prepended to the agent input.
pub fn format_for_agent(plan: &Plan) -> String {
    let mut out = format!(
        "QUERY ANALYSIS (Planning Layer):\n\nUSER INTENT: {}\nQUERY TYPE: {}\n\nEXECUTION PLAN (FOLLOW EXACTLY):\n",
        if plan.intent.is_empty() { "Unknown" } else { &plan.intent },
        if plan.query_type.is_empty() { "general" } else { &plan.query_type },
    );

    for (i, step) in plan.action_plan.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    out.push_str(&format!(
        "\nRECOMMENDED TOOLS: {}\n",
        plan.recommended_tools.join(", ")
    ));

    if !plan.search_queries.is_empty() {
        out.push_str("\nSUGGESTED SEARCHES (use these exact queries):\n");
        for query in &plan.search_queries {
            out.push_str(&format!("  - \"{}\"\n", query));
        }
    }

    out.push_str(&format!(
        "\nMAXIMUM TOOL CALLS ALLOWED: {}\n",
        plan.max_tool_calls
    ));
    out.push_str(&format!(
        "\nSTOPPING CONDITION:\n{}\n",
        if plan.stopping_condition.is_empty() {
            "Stop when you have enough info to answer"
        } else {
            &plan.stopping_condition
        }
    ));

    if !plan.fallback_strategy.is_empty() {
        out.push_str(&format!("\nFALLBACK STRATEGY:\n{}\n", plan.fallback_strategy));
    }
    if !plan.context.is_empty() {
        out.push_str(&format!("\nCONTEXT: {}\n", plan.context));
    }

    out.push_str("\nCRITICAL: Follow this plan EXACTLY. Do NOT make extra searches.\n");
    out.push_str("CRITICAL: STOP after reaching max tool calls or stopping condition.\n");
    out.push_str("CRITICAL: If a tool fails, use fallback strategy immediately.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::traits::{ProviderResponse, ToolCall};

    struct ScriptedProvider {
        reply: String,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Value],
            _tools: &[Value],
        ) -> anyhow::Result<ProviderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderResponse {
                content: Some(self.reply.clone()),
                tool_calls: Vec::<ToolCall>::new(),
                usage: None,
            })
        }
    }

    #[test]
    fn simple_lookup_detection() {
        assert!(looks_like_simple_lookup("is gmail available?"));
        assert!(looks_like_simple_lookup("does flowhub support notion"));
        assert!(looks_like_simple_lookup("gmail?"));
        assert!(!looks_like_simple_lookup(&"x".repeat(200)));
    }

    #[test]
    fn detail_lookup_detection() {
        assert!(looks_like_detail_lookup(
            "what are the input fields for the send email action"
        ));
        // Detail keyword without an action term is not enough.
        assert!(!looks_like_detail_lookup("how do I configure my account"));
    }

    #[test]
    fn fast_plan_shapes() {
        let plan = fast_plan("is gmail available?").unwrap();
        assert_eq!(plan.query_type, "simple_check");
        assert_eq!(plan.max_tool_calls, 1);
        assert_eq!(plan.recommended_tools, vec!["check_piece"]);

        let plan = fast_plan("what inputs does the send email action take").unwrap();
        assert_eq!(plan.query_type, "configuration");
        assert_eq!(plan.recommended_tools, vec!["search_piece_docs"]);
    }

    #[tokio::test]
    async fn fast_path_skips_llm() {
        let provider = Arc::new(ScriptedProvider::new("{}"));
        let planner = QueryPlanner::new(provider.clone(), "fast-model".into(), 8);
        let plan = planner.analyze("is gmail available?").await;
        assert_eq!(plan.query_type, "simple_check");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn llm_plan_parses_fenced_json() {
        let reply = "```json\n{\"intent\": \"explain routers\", \"query_type\": \"explanation\", \"max_tool_calls\": 2}\n```";
        let provider = Arc::new(ScriptedProvider::new(reply));
        let planner = QueryPlanner::new(provider, "fast-model".into(), 8);
        let plan = planner
            .analyze("walk me through designing a complicated branched workflow")
            .await;
        assert_eq!(plan.intent, "explain routers");
        assert_eq!(plan.max_tool_calls, 2);
    }

    #[tokio::test]
    async fn cache_prevents_repeat_llm_calls() {
        let reply = r#"{"intent": "x", "query_type": "explanation"}"#;
        let provider = Arc::new(ScriptedProvider::new(reply));
        let planner = QueryPlanner::new(provider.clone(), "fast-model".into(), 8);

        let query = "walk me through designing a complicated branched workflow";
        planner.analyze(query).await;
        planner.analyze(query).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back() {
        let provider = Arc::new(ScriptedProvider::new("I refuse to emit JSON"));
        let planner = QueryPlanner::new(provider, "fast-model".into(), 8);
        let plan = planner
            .analyze("walk me through designing a complicated branched workflow")
            .await;
        assert_eq!(plan.query_type, "general");
    }

    #[test]
    fn format_includes_plan_sections() {
        let plan = simple_lookup_plan("is gmail available?");
        let formatted = format_for_agent(&plan);
        assert!(formatted.contains("EXECUTION PLAN"));
        assert!(formatted.contains("MAXIMUM TOOL CALLS ALLOWED: 1"));
        assert!(formatted.contains("STOPPING CONDITION"));
        assert!(formatted.contains("check_piece"));
    }
}
