//! Lenient JSON parsing for model output.
//!
//! Models asked for a JSON object still wrap it in prose or markdown fences
//! often enough that a strict parse alone is not good enough.

use anyhow::Result;
use serde::de::DeserializeOwned;

/// Parse `text` as a JSON object of type `T`.
///
/// Tries a direct parse first, then the span between the first `{` and the
/// last `}`. Fails when neither yields a valid `T`.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();

    // Try direct parse first
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    // Try extracting JSON from markdown code block or surrounding prose
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            match serde_json::from_str::<T>(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => anyhow::bail!("Embedded JSON object did not match: {}", e),
            }
        }
    }

    anyhow::bail!(
        "No JSON object found in response: {}",
        trimmed.chars().take(120).collect::<String>()
    )
}
