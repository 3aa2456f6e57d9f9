//! User content validation and markup sanitization.

use std::collections::HashSet;
use std::sync::LazyLock;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};

/// Strips every tag; `<script>` and `<style>` lose their contents too.
static SANITIZER: LazyLock<ammonia::Builder<'static>> = LazyLock::new(|| {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("Message content is required")]
    Empty,

    #[error("Message exceeds maximum length of {max}")]
    TooLong { max: usize },
}

/// Upper bound on clean/decode rounds for entity-encoded markup.
const MAX_SANITIZE_PASSES: usize = 3;

/// Remove all markup from `text`, leaving plain characters unescaped.
///
/// Decoding can surface markup that was written as entities
/// (`&lt;script&gt;`), so passes repeat until the text stops changing.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_SANITIZE_PASSES {
        let next = strip_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn strip_pass(text: &str) -> String {
    let cleaned = SANITIZER.clean(text).to_string();
    match unescape_with(&cleaned, resolve_entity) {
        Ok(plain) => plain.into_owned(),
        Err(_) => cleaned,
    }
}

/// The serializer emits the XML entities plus `&nbsp;`.
fn resolve_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some("\u{a0}"),
        other => resolve_predefined_entity(other),
    }
}

/// Trim, reject empty or oversized input, sanitize, and re-check.
///
/// Length is measured in characters.
pub fn validate_content(raw: &str, max_len: usize) -> Result<String, ContentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ContentError::Empty);
    }
    if trimmed.chars().count() > max_len {
        return Err(ContentError::TooLong { max: max_len });
    }

    let clean = sanitize(trimmed);
    let clean = clean.trim();
    if clean.is_empty() {
        return Err(ContentError::Empty);
    }
    if clean.chars().count() > max_len {
        return Err(ContentError::TooLong { max: max_len });
    }
    Ok(clean.to_string())
}
