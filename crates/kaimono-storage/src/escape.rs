//! User search input made safe for the two query sublanguages it feeds:
//! FTS5 MATCH expressions and LIKE patterns.

/// Escapes free text into an FTS5 expression that matches every
/// whitespace-separated token literally, AND-ed together. Each token is
/// wrapped in double quotes with embedded quotes doubled, so FTS5 operators
/// in the input have no effect.
///
/// Empty or whitespace-only input yields an empty string; callers treat that
/// as "no search".
pub fn escape_fts5_query(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Builds the MATCH expression for the item search: every token must appear
/// in the item name or the brand. Uses the FTS5 column-set filter so the
/// either-field alternation applies per token.
pub fn build_fts5_item_brand_query(input: &str) -> String {
    let escaped = escape_fts5_query(input);
    if escaped.is_empty() {
        return String::new();
    }

    format!("{{name brand}} : ({escaped})")
}

/// Escapes LIKE metacharacters for use with `ESCAPE '\'`. Backslash is
/// escaped first; doing `%`/`_` first would double-escape the backslashes
/// their replacements introduce. The caller appends `%` wildcards.
pub fn escape_like_prefix(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
