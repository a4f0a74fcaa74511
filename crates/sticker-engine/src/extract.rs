use std::sync::OnceLock;

use regex::Regex;
use sticker_contracts::reference::{is_http_url, ImageReference};
use sticker_contracts::StickerError;

fn markdown_image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!\[.*?\]\((.*?)\)").expect("valid markdown image regex"))
}

/// Finds the generated sheet in completion text.
///
/// A markdown image wins over a bare URL or data URI because models often
/// wrap the link in prose.
pub fn extract_image_reference(content: &str) -> Result<ImageReference, StickerError> {
    if content.trim().is_empty() {
        return Err(StickerError::EmptyResponse(
            "the API returned no content".to_string(),
        ));
    }

    if let Some(url) = markdown_image_pattern()
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().trim())
        .filter(|url| !url.is_empty())
    {
        return Ok(ImageReference::new(url));
    }

    let trimmed = content.trim();
    if is_http_url(trimmed) || trimmed.starts_with("data:image") {
        return Ok(ImageReference::new(trimmed));
    }

    Err(StickerError::Extraction)
}
