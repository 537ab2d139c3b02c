//! AI-task detection: maps an action description to one of the native
//! Flowhub AI utility pieces (Text AI, Utility AI, Image AI, Video AI)
//! so guides recommend the built-in AI steps before custom API calls.

use std::collections::HashMap;

use tokio::sync::OnceCell;

use crate::catalog::{CatalogStore, PieceDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiCategory {
    Image,
    Video,
    Structured,
    Moderation,
    Classification,
    Summary,
    Text,
}

const IMAGE_KEYWORDS: &[&str] = &["image", "logo", "banner", "graphic", "picture", "thumbnail"];
const VIDEO_KEYWORDS: &[&str] = &["video", "clip", "animation", "reel", "promo"];
const STRUCTURED_KEYWORDS: &[&str] = &[
    "extract", "structured", "json", "schema", "fields", "parse", "table", "invoice",
];
const MODERATION_KEYWORDS: &[&str] = &["moderation", "flag", "safe", "inappropriate"];
const CLASSIFICATION_KEYWORDS: &[&str] = &["classify", "categorize", "category", "label"];
const SUMMARY_KEYWORDS: &[&str] = &["summarize", "summary", "tl;dr", "compress"];
const TEXT_KEYWORDS: &[&str] = &[
    "ask", "answer", "write", "generate", "draft", "translate", "sentiment", "analysis", "chat",
    "respond", "reply", "describe", "explain", "gpt", "gpt-4", "gpt4", "gpt-5", "gpt5", "chatgpt",
    "openai", "claude", "gemini", "sonnet", "anthropic",
];

/// Classify an action description. Order matters: the more specific
/// categories are checked before the generic text bucket.
pub fn detect_ai_category(text: &str) -> Option<AiCategory> {
    if text.is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if contains_any(IMAGE_KEYWORDS) {
        return Some(AiCategory::Image);
    }
    if contains_any(VIDEO_KEYWORDS) {
        return Some(AiCategory::Video);
    }
    if contains_any(STRUCTURED_KEYWORDS) {
        return Some(AiCategory::Structured);
    }
    if contains_any(MODERATION_KEYWORDS) {
        return Some(AiCategory::Moderation);
    }
    if contains_any(CLASSIFICATION_KEYWORDS) {
        return Some(AiCategory::Classification);
    }
    if contains_any(SUMMARY_KEYWORDS) {
        return Some(AiCategory::Summary);
    }
    if contains_any(TEXT_KEYWORDS) {
        return Some(AiCategory::Text);
    }
    None
}

/// A resolved native-AI recommendation for an action requirement.
#[derive(Debug, Clone)]
pub struct AiRecommendation {
    pub piece_key: &'static str,
    pub piece: PieceDetails,
    pub action: String,
    pub reason: &'static str,
}

const AI_PIECES: &[(&str, &str)] = &[
    ("text_ai", "Text AI"),
    ("utility_ai", "Utility AI"),
    ("image_ai", "Image AI"),
    ("video_ai", "Video AI"),
];

/// Lazily-loaded catalog of the native AI pieces. Lookups are cached
/// for the life of the process; missing pieces cache as None.
pub struct AiPieceCatalog {
    catalog: CatalogStore,
    cache: OnceCell<HashMap<&'static str, Option<PieceDetails>>>,
}

impl AiPieceCatalog {
    pub fn new(catalog: CatalogStore) -> Self {
        Self {
            catalog,
            cache: OnceCell::new(),
        }
    }

    async fn pieces(&self) -> &HashMap<&'static str, Option<PieceDetails>> {
        self.cache
            .get_or_init(|| async {
                let mut map = HashMap::new();
                for (key, display_name) in AI_PIECES {
                    let piece = match self.catalog.find_piece(display_name).await {
                        Ok(piece) => piece,
                        Err(e) => {
                            tracing::warn!("Unable to load AI piece '{}': {}", display_name, e);
                            None
                        }
                    };
                    map.insert(*key, piece);
                }
                map
            })
            .await
    }

    async fn get(&self, key: &str) -> Option<PieceDetails> {
        self.pieces().await.get(key).cloned().flatten()
    }

    /// Resolve the preferred native AI piece + action for an action
    /// description, or None when the task isn't AI-shaped (or the piece
    /// is absent from the catalog).
    pub async fn recommend(&self, action_text: &str) -> Option<AiRecommendation> {
        let category = detect_ai_category(action_text)?;

        let (piece_key, desired_action, reason) = match category {
            AiCategory::Structured => (
                "utility_ai",
                "Extract Structured Data",
                "Structured data extraction task",
            ),
            AiCategory::Moderation => ("utility_ai", "Check Moderation", "Content moderation task"),
            AiCategory::Classification => {
                ("utility_ai", "Classify Text", "Text classification task")
            }
            AiCategory::Summary => ("text_ai", "Summarize Text", "Text summarization task"),
            AiCategory::Image => ("image_ai", "Generate Image", "Image generation task"),
            AiCategory::Video => ("video_ai", "Generate Video", "Video generation task"),
            AiCategory::Text => (
                "text_ai",
                "Ask AI",
                "Text AI supports OpenAI, Claude, and Gemini models directly",
            ),
        };

        let piece = self.get(piece_key).await?;
        let action = resolve_action_display(&piece, desired_action);
        Some(AiRecommendation {
            piece_key,
            piece,
            action,
            reason,
        })
    }
}

/// Prefer the catalog's exact display name for the action when present.
fn resolve_action_display(piece: &PieceDetails, desired_action: &str) -> String {
    for action in &piece.actions {
        if action.display_name.eq_ignore_ascii_case(desired_action) {
            return action.display_name.clone();
        }
    }
    desired_action.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_specific_categories_before_text() {
        assert_eq!(
            detect_ai_category("generate a logo image"),
            Some(AiCategory::Image)
        );
        assert_eq!(
            detect_ai_category("extract invoice fields as json"),
            Some(AiCategory::Structured)
        );
        assert_eq!(
            detect_ai_category("summarize the ticket"),
            Some(AiCategory::Summary)
        );
        assert_eq!(
            detect_ai_category("classify support emails"),
            Some(AiCategory::Classification)
        );
    }

    #[test]
    fn text_bucket_catches_model_names() {
        assert_eq!(detect_ai_category("ask gpt-5"), Some(AiCategory::Text));
        assert_eq!(
            detect_ai_category("have claude reply to the message"),
            Some(AiCategory::Text)
        );
    }

    #[test]
    fn non_ai_tasks_are_none() {
        assert_eq!(detect_ai_category("upload the file to dropbox"), None);
        assert_eq!(detect_ai_category(""), None);
    }

    #[tokio::test]
    async fn recommendation_absent_when_catalog_lacks_ai_pieces() {
        let store = crate::catalog::test_support::store_with_sample_data().await;
        let ai_catalog = AiPieceCatalog::new(store);
        // Sample catalog has no Text AI piece, so no recommendation.
        assert!(ai_catalog.recommend("summarize the email").await.is_none());
        // Non-AI tasks short-circuit before any lookup.
        assert!(ai_catalog.recommend("send an email").await.is_none());
    }
}
