//! Media format policy shared by all provider adapters.

/// Normalize a format string to a leading-dot, lowercase extension.
///
/// `"png"`, `".PNG"` and `" png "` all become `".png"`. An empty input stays empty.
pub fn normalize_format(format: &str) -> String {
    let trimmed = format.trim().trim_start_matches('.').to_ascii_lowercase();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed)
    }
}

/// Resolve the file extension for a record's media.
///
/// When the provider reports a content type, the extension is derived from its
/// subtype with any parameters stripped (`image/png; charset=binary` -> `.png`).
/// `svg+xml` maps to `.svg`, also when the provider reports the bare subtype.
/// A missing or blank content type falls back to the collection's candidate format.
pub fn resolve_media_format(content_type: Option<&str>, candidate: &str) -> String {
    let subtype = content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim())
        .filter(|ct| !ct.is_empty())
        .map(|ct| ct.rsplit('/').next().unwrap_or(ct).trim().to_ascii_lowercase());

    match subtype.as_deref() {
        Some("") | None => normalize_format(candidate),
        Some("svg+xml") => ".svg".to_string(),
        Some(other) => normalize_format(other),
    }
}
