use std::fmt;

use thiserror::Error;

/// Aggregated substitution-engine failure. Every individual explanation found
/// during a render is collected so the caller gets one complete diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub messages: Vec<String>,
}

impl RenderError {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages.join("\n"))
    }
}

impl std::error::Error for RenderError {}

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Input bytes are not a valid ZIP container, or a required XML part is
    /// unreadable. Surfaced to users as "invalid template file".
    #[error("invalid DOCX template file: {0}")]
    MalformedArchive(String),

    #[error("invalid DOCX template file: expected a .docx extension, got {0:?}")]
    InvalidExtension(String),

    #[error("template exceeds maximum upload size ({size} > {limit} bytes)")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("DOCX templating error:\n{0}")]
    Render(RenderError),

    #[error("no template uploaded for document type {0:?}")]
    MissingTemplate(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_joins_messages_with_newlines() {
        let err = RenderError::new(vec![
            "Unclosed loop {{#items_table}}".to_string(),
            "Unopened loop {{/rows}}".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Unclosed loop {{#items_table}}\nUnopened loop {{/rows}}"
        );
    }

    #[test]
    fn size_limit_message_names_both_sizes() {
        let err = TemplateError::SizeLimitExceeded {
            size: 6_000_000,
            limit: 5_242_880,
        };
        assert!(err.to_string().contains("6000000"));
        assert!(err.to_string().contains("5242880"));
    }
}
