//! Query normalization, routing heuristics, and retrieval variants.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Stopwords filtered out when extracting topical keywords.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "what", "which", "who", "where", "when", "why", "how", "does", "do", "did", "is", "are",
        "was", "were", "can", "could", "should", "would", "may", "might", "will", "shall", "i",
        "me", "my", "we", "you", "they", "he", "she", "it", "this", "that", "these", "those",
        "them", "to", "for", "of", "and", "or", "the", "a", "an", "in", "on", "with", "into",
        "from", "about", "need", "show", "list", "find", "get", "tell", "give", "using", "use",
        "available", "availability", "piece", "pieces", "integration", "integrations", "action",
        "actions", "trigger", "triggers", "connector", "connectors", "flow", "flows", "flowhub",
    ]
    .into_iter()
    .collect()
});

/// Phrases that immediately mark a query as on-domain.
static DOMAIN_PHRASES: &[&str] = &[
    "flowhub",
    "flow hub",
    "flow builder",
    "build flow",
    "automation",
    "webhook",
    "web hook",
    "zapier",
    "make.com",
    "make com",
    "code step",
    "trigger step",
];

/// Tokens counted toward the two-hit domain threshold.
static DOMAIN_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "flowhub", "flow", "builder", "automation", "automations", "trigger", "triggers",
        "action", "actions", "integration", "integrations", "webhook", "webhooks", "step",
        "steps", "run", "code", "typescript", "slack", "gmail", "notion", "database", "vector",
        "search", "plan", "workflow", "workflows", "api", "key", "keys", "piece", "pieces",
        "schedule", "cron", "connector", "connectors",
    ]
    .into_iter()
    .collect()
});

/// Collapse whitespace and trim.
pub fn normalize_query(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").to_string()
}

/// Extract a topical phrase by removing stopwords while preserving order.
fn extract_topic_phrase(normalized: &str, max_tokens: usize) -> String {
    let mut filtered = Vec::new();
    for token in TOKEN_RE.find_iter(normalized) {
        let word = token.as_str();
        if STOPWORDS.contains(word.to_lowercase().as_str()) {
            continue;
        }
        filtered.push(word);
        if filtered.len() >= max_tokens {
            break;
        }
    }
    filtered.join(" ")
}

/// Generate diversified query variants for retrieval fan-out. Always
/// returns at least `min_variants` entries for a non-empty query.
pub fn query_variants(user_query: &str, min_variants: usize) -> Vec<String> {
    let normalized = normalize_query(user_query);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut variants: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut add = |candidate: String, variants: &mut Vec<String>| {
        let cleaned = normalize_query(&candidate);
        if cleaned.is_empty() {
            return;
        }
        if seen.insert(cleaned.to_lowercase()) {
            variants.push(cleaned);
        }
    };

    add(normalized.clone(), &mut variants);

    let topic = extract_topic_phrase(&normalized, 6);
    if !topic.is_empty() {
        add(format!("Flowhub {} integrations", topic), &mut variants);
        add(format!("{} Flowhub pieces", topic), &mut variants);
        add(format!("{} automation in Flowhub", topic), &mut variants);
    } else {
        add(format!("{} Flowhub", normalized), &mut variants);
        add(format!("Flowhub {}", normalized), &mut variants);
    }

    let fallbacks = [
        format!("{} integrations", normalized),
        format!("{} automation", normalized),
        format!("{} setup Flowhub", normalized),
        format!("{} use cases", normalized),
        format!("{} documentation Flowhub", normalized),
    ];
    for variant in fallbacks {
        if variants.len() >= min_variants {
            break;
        }
        add(variant, &mut variants);
    }

    let mut counter = 1;
    while variants.len() < min_variants {
        add(format!("{} Flowhub reference {}", normalized, counter), &mut variants);
        counter += 1;
    }

    variants
}

fn matches_domain(normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }

    let lowered = normalized.to_lowercase();
    for phrase in DOMAIN_PHRASES {
        if lowered.contains(phrase) {
            return true;
        }
    }

    let hits = TOKEN_RE
        .find_iter(&lowered)
        .filter(|t| DOMAIN_TOKENS.contains(t.as_str()))
        .count();
    hits >= 2
}

/// Heuristically determine if a query is about Flowhub / workflow
/// automation. Recent history is consulted so short follow-ups
/// ("add another step") still route to the agent when the dialogue has
/// been on-domain.
pub fn is_platform_query(user_query: &str, history: &[String]) -> bool {
    let normalized = normalize_query(user_query);
    if matches_domain(&normalized) {
        return true;
    }

    if history.is_empty() {
        return false;
    }

    let mut recent: Vec<String> = Vec::new();
    for entry in history.iter().rev() {
        if recent.len() >= 6 {
            break;
        }
        let normalized_entry = normalize_query(entry);
        if normalized_entry.is_empty() {
            continue;
        }
        if matches_domain(&normalized_entry) {
            return true;
        }
        recent.push(normalized_entry);
    }

    if recent.is_empty() {
        return false;
    }

    // Combine snippets to catch clues spread across turns.
    let mut combined = normalized;
    for snippet in &recent {
        combined.push(' ');
        combined.push_str(snippet);
    }
    matches_domain(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_query("  send   email\n now "), "send email now");
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn domain_phrase_match() {
        assert!(is_platform_query("does Flowhub support Notion?", &[]));
        assert!(is_platform_query("how do webhooks work", &[]));
    }

    #[test]
    fn domain_token_threshold() {
        // Two domain tokens: "slack" + "trigger"
        assert!(is_platform_query("is there a slack trigger", &[]));
        // One hit is not enough
        assert!(!is_platform_query("tell me about slack the company", &[]));
    }

    #[test]
    fn off_domain_without_history() {
        assert!(!is_platform_query("what's the capital of France?", &[]));
    }

    #[test]
    fn short_follow_up_routes_via_history() {
        let history = vec![
            "I want to build a flow that posts to Slack".to_string(),
            "Sure, start with the Slack piece...".to_string(),
        ];
        assert!(is_platform_query("add another step", &history));
    }

    #[test]
    fn irrelevant_history_does_not_leak() {
        let history = vec!["what's the weather today".to_string()];
        assert!(!is_platform_query("and tomorrow?", &history));
    }

    #[test]
    fn variants_start_with_original() {
        let variants = query_variants("send gmail attachments to dropbox", 3);
        assert_eq!(variants[0], "send gmail attachments to dropbox");
        assert!(variants.len() >= 3);
    }

    #[test]
    fn variants_are_deduped_case_insensitively() {
        let variants = query_variants("Flowhub", 3);
        let lowered: Vec<String> = variants.iter().map(|v| v.to_lowercase()).collect();
        let unique: HashSet<&String> = lowered.iter().collect();
        assert_eq!(unique.len(), lowered.len());
    }

    #[test]
    fn empty_query_yields_no_variants() {
        assert!(query_variants("   ", 3).is_empty());
    }

    #[test]
    fn topic_phrase_drops_stopwords() {
        assert_eq!(
            extract_topic_phrase("how do i send an email with gmail", 6),
            "send email gmail"
        );
    }
}
