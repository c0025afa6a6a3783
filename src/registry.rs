use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schema::{mapping_resolves, SchemaOracle};
use crate::tokens::{is_array_field, is_valid_name, strip_loop_marker};

/// Registered placeholder names are plain lowercase snake_case; the `#`/`/`
/// loop markers are a template-side extension, never part of the identity.
static ENTRY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("entry name regex"));

/// The authoritative mapping from a placeholder name to its business-data
/// source. Identity key is `placeholder_name`; entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    pub placeholder_name: String,
    pub display_name: String,
    pub data_source_table: String,
    pub data_source_field: String,
    #[serde(default)]
    pub template_types_allowed: Vec<String>,
}

/// Repository interface over the persisted registry, injected into the
/// validator so tests can run against an in-memory fake.
pub trait Registry {
    fn find_by_name(&self, name: &str) -> anyhow::Result<Option<PlaceholderEntry>>;
    fn list_names(&self) -> anyhow::Result<Vec<String>>;
    fn insert(&mut self, entry: PlaceholderEntry) -> anyhow::Result<()>;
}

fn check_entry(entries: &[PlaceholderEntry], entry: &PlaceholderEntry) -> anyhow::Result<()> {
    if !ENTRY_NAME_RE.is_match(&entry.placeholder_name) {
        bail!(
            "invalid placeholder name {:?}: must be lowercase snake_case",
            entry.placeholder_name
        );
    }
    if entries
        .iter()
        .any(|e| e.placeholder_name == entry.placeholder_name)
    {
        bail!("placeholder {:?} is already registered", entry.placeholder_name);
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: Vec<PlaceholderEntry>,
}

impl MemoryRegistry {
    pub fn with_entries(entries: Vec<PlaceholderEntry>) -> Self {
        Self { entries }
    }
}

impl Registry for MemoryRegistry {
    fn find_by_name(&self, name: &str) -> anyhow::Result<Option<PlaceholderEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.placeholder_name == name)
            .cloned())
    }

    fn list_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.placeholder_name.clone())
            .collect())
    }

    fn insert(&mut self, entry: PlaceholderEntry) -> anyhow::Result<()> {
        check_entry(&self.entries, &entry)?;
        self.entries.push(entry);
        Ok(())
    }
}

/// File-backed registry: a JSON array of entries, loaded whole and rewritten
/// on insert. A missing file reads as an empty registry.
#[derive(Debug)]
pub struct JsonRegistry {
    path: PathBuf,
    entries: Vec<PlaceholderEntry>,
}

impl JsonRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let entries = if path.exists() {
            let bytes = std::fs::read(path)
                .with_context(|| format!("read registry file: {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parse registry file: {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[PlaceholderEntry] {
        &self.entries
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create registry dir: {}", parent.display()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.entries).context("serialize registry")?;
        std::fs::write(&self.path, bytes)
            .with_context(|| format!("write registry file: {}", self.path.display()))
    }
}

impl Registry for JsonRegistry {
    fn find_by_name(&self, name: &str) -> anyhow::Result<Option<PlaceholderEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.placeholder_name == name)
            .cloned())
    }

    fn list_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.placeholder_name.clone())
            .collect())
    }

    fn insert(&mut self, entry: PlaceholderEntry) -> anyhow::Result<()> {
        check_entry(&self.entries, &entry)?;
        log::info!(
            "registering placeholder {} -> {}.{}",
            entry.placeholder_name,
            entry.data_source_table,
            entry.data_source_field
        );
        self.entries.push(entry);
        self.save()
    }
}

/// Per-token validation outcome, reported in extraction order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub placeholder: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationResult {
    fn ok(placeholder: &str) -> Self {
        Self {
            placeholder: placeholder.to_string(),
            valid: true,
            error: None,
            suggestion: None,
        }
    }

    fn fail(placeholder: &str, error: String, suggestion: Option<String>) -> Self {
        Self {
            placeholder: placeholder.to_string(),
            valid: false,
            error: Some(error),
            suggestion,
        }
    }
}

/// Check every extracted token against the naming grammar, the registry and
/// the live schema. Callers reject an upload if any result is invalid, and
/// surface all failures together so the user can fix everything in one pass.
pub fn validate_placeholders(
    tokens: &[String],
    registry: &dyn Registry,
    schema: &dyn SchemaOracle,
) -> anyhow::Result<Vec<ValidationResult>> {
    let all_names = registry.list_names()?;
    let suggest = |name: &str| -> Option<String> {
        all_names
            .iter()
            .find(|n| n.contains(name) || name.contains(n.as_str()))
            .map(|n| format!("Did you mean: {{{{{n}}}}}?"))
    };

    let mut results = Vec::with_capacity(tokens.len());
    for raw in tokens {
        if !is_valid_name(raw) {
            results.push(ValidationResult::fail(
                raw,
                format!(
                    "Invalid placeholder format: {{{{{raw}}}}}. Must be lowercase snake_case without spaces."
                ),
                None,
            ));
            continue;
        }

        let name = strip_loop_marker(raw);

        // Loop-body row fields are not top-level scalar placeholders and are
        // exempt from registry lookup.
        if is_array_field(name) {
            results.push(ValidationResult::ok(name));
            continue;
        }

        match registry.find_by_name(name)? {
            None => results.push(ValidationResult::fail(
                name,
                format!("Placeholder {{{{{name}}}}} not found in registry."),
                suggest(name),
            )),
            Some(entry) => {
                if mapping_resolves(schema, &entry.data_source_table, &entry.data_source_field) {
                    results.push(ValidationResult::ok(name));
                } else {
                    results.push(ValidationResult::fail(
                        name,
                        format!(
                            "Placeholder {{{{{name}}}}} mapped to {}.{} but field does not exist in the data schema.",
                            entry.data_source_table, entry.data_source_field
                        ),
                        suggest(name),
                    ));
                }
            }
        }
    }
    Ok(results)
}
