use std::collections::HashSet;

use crate::docx::package::{scannable_part, DocxPackage};
use crate::error::TemplateError;
use crate::tokens::{is_valid_name, ANY_TOKEN_RE, STRICT_TOKEN_RE, XML_TAG_RE};

/// Scan a template archive for `{{ }}` placeholder tokens.
///
/// Returns distinct tokens in first-seen order, including malformed ones so
/// the validator can report them instead of silently dropping them. Only the
/// main body and header/footer parts are scanned.
pub fn extract_placeholders(docx: &[u8]) -> Result<Vec<String>, TemplateError> {
    let pkg = DocxPackage::from_bytes(docx)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut push = |seen: &mut HashSet<String>, tokens: &mut Vec<String>, tok: &str| {
        if seen.insert(tok.to_string()) {
            tokens.push(tok.to_string());
        }
    };

    for ent in pkg.entries.iter().filter(|e| scannable_part(&e.name)) {
        let xml = std::str::from_utf8(&ent.data).map_err(|e| {
            TemplateError::MalformedArchive(format!("part {} is not valid UTF-8: {e}", ent.name))
        })?;

        // Strip markup before matching: the document format splits a single
        // visible placeholder across formatting runs, so the raw XML may
        // carry it as `{{custom` + `er_name}}`. Detagging reassembles the
        // contiguous text so the token survives as one string.
        let text = XML_TAG_RE.replace_all(xml, "");

        for cap in STRICT_TOKEN_RE.captures_iter(&text) {
            push(&mut seen, &mut tokens, &cap[1]);
        }
        // Permissive pass: collect malformed tokens (uppercase, spaces, ...)
        // for later per-token rejection.
        for cap in ANY_TOKEN_RE.captures_iter(&text) {
            let inner = &cap[1];
            if !is_valid_name(inner) {
                push(&mut seen, &mut tokens, inner);
            }
        }
        log::debug!("scanned {}: {} distinct tokens so far", ent.name, tokens.len());
    }

    Ok(tokens)
}
