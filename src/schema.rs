use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Narrow capability interface over live schema metadata. Placeholder data
/// sources are validated against whatever the backing store reports, so new
/// tables and columns become valid targets without code changes.
pub trait SchemaOracle {
    fn table_exists(&self, table: &str) -> bool;
    fn column_exists(&self, table: &str, column: &str) -> bool;
}

/// Does the declared `(table, field)` data source resolve? The `system`
/// pseudo-table is exempt: its values are computed per render, not stored.
pub fn mapping_resolves(oracle: &dyn SchemaOracle, table: &str, field: &str) -> bool {
    if table == "system" {
        return true;
    }
    oracle.table_exists(table) && oracle.column_exists(table, field)
}

/// Schema snapshot loaded from a JSON `{ "table": ["column", ...] }`
/// document. Stands in for live introspection when running from the CLI and
/// doubles as the test fake.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticSchema {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl StaticSchema {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read schema file: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse schema file: {}", path.display()))
    }

    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            table.to_string(),
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }
}

impl SchemaOracle for StaticSchema {
    fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|cols| cols.contains(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> StaticSchema {
        StaticSchema::default()
            .with_table("customers", ["customer_name", "email"])
            .with_table("invoices", ["invoice_number", "total"])
    }

    #[test]
    fn resolves_known_columns() {
        let s = schema();
        assert!(mapping_resolves(&s, "customers", "email"));
        assert!(!mapping_resolves(&s, "customers", "fax_number"));
        assert!(!mapping_resolves(&s, "suppliers", "name"));
    }

    #[test]
    fn system_pseudo_table_is_exempt() {
        let s = schema();
        assert!(mapping_resolves(&s, "system", "document_number"));
        assert!(mapping_resolves(&s, "system", "anything_at_all"));
    }

    #[test]
    fn parses_json_table_map() {
        let s: StaticSchema =
            serde_json::from_str(r#"{"customers": ["customer_name"], "products": []}"#)
                .expect("parse");
        assert!(s.table_exists("customers"));
        assert!(s.table_exists("products"));
        assert!(!s.column_exists("products", "sku"));
    }
}
