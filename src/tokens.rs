use once_cell::sync::Lazy;
use regex::Regex;

/// Token grammar for template placeholders: lowercase snake_case names inside
/// `{{ }}`, extended with a single leading `#` or `/` for loop markers.
pub static STRICT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-z0-9_#/]+)\}\}").expect("strict token regex"));

/// Permissive match: anything non-`}` inside `{{ }}`. Used to catch malformed
/// placeholders so they can be reported instead of silently ignored.
pub static ANY_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("any token regex"));

pub static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_#/]+$").expect("name regex"));

pub static LOOP_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{#([a-z0-9_]+)\}\}").expect("loop open regex"));

pub static LOOP_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{/([a-z0-9_]+)\}\}").expect("loop close regex"));

/// Markup stripper for run-fragment reassembly during extraction.
pub static XML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

/// Loop-body row fields. These live inside the `items_table` rows, not in the
/// top-level scalar mapping, and are exempt from registry lookup.
pub const ARRAY_FIELDS: [&str; 5] = [
    "items_table",
    "description",
    "quantity",
    "unit_price",
    "amount",
];

pub const LOOP_KEY: &str = "items_table";

pub fn is_valid_name(token: &str) -> bool {
    NAME_RE.is_match(token)
}

/// Strip a single leading `#` (loop open) or `/` (loop close) marker.
pub fn strip_loop_marker(token: &str) -> &str {
    token
        .strip_prefix('#')
        .or_else(|| token.strip_prefix('/'))
        .unwrap_or(token)
}

pub fn is_array_field(name: &str) -> bool {
    ARRAY_FIELDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_grammar_accepts_loop_markers() {
        assert!(is_valid_name("customer_name"));
        assert!(is_valid_name("#items_table"));
        assert!(is_valid_name("/items_table"));
        assert!(!is_valid_name("Customer Name"));
        assert!(!is_valid_name("total-amount"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn strip_loop_marker_removes_one_prefix() {
        assert_eq!(strip_loop_marker("#items_table"), "items_table");
        assert_eq!(strip_loop_marker("/items_table"), "items_table");
        assert_eq!(strip_loop_marker("items_table"), "items_table");
        // Only a single leading marker is stripped.
        assert_eq!(strip_loop_marker("#/x"), "/x");
    }

    #[test]
    fn array_fields_whitelist() {
        assert!(is_array_field("quantity"));
        assert!(is_array_field("items_table"));
        assert!(!is_array_field("customer_name"));
    }
}
