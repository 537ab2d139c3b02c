//! Common utility functions used across the codebase.

/// Truncates a string to at most `max_chars` characters, adding "..." if
/// truncated. UTF-8 safe: counts characters, not bytes.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    // Fast path: byte length <= max_chars implies char count is too.
    if s.len() <= max_chars {
        return s.to_string();
    }

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix = "...";
    if max_chars <= suffix.len() {
        return suffix.chars().take(max_chars).collect();
    }

    let truncated: String = s.chars().take(max_chars - suffix.len()).collect();
    format!("{}{}", truncated, suffix)
}

/// Extract the JSON payload from an LLM reply that may wrap it in
/// markdown code fences (```json ... ``` or plain ``` ... ```).
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        // Skip an optional language tag on the fence line.
        let rest = match rest.find('\n') {
            Some(nl) if !rest[..nl].contains('{') => &rest[nl + 1..],
            _ => rest,
        };
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }

    trimmed
}
