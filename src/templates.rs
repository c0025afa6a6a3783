use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{build_context, RenderRequest, TemplateType};
use crate::docx::extract::extract_placeholders;
use crate::docx::render::render_template;
use crate::error::TemplateError;
use crate::registry::{validate_placeholders, Registry, ValidationResult};
use crate::schema::SchemaOracle;
use crate::store::BlobStore;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// One accepted upload. Uploads never overwrite each other; the active
/// template per type is simply the newest record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub id: u64,
    pub template_type: TemplateType,
    pub file_url: String,
    pub file_name: String,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only upload history, persisted as a JSON array. A missing file
/// reads as an empty history.
#[derive(Debug)]
pub struct TemplateHistory {
    path: PathBuf,
    files: Vec<TemplateFile>,
}

impl TemplateHistory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let files = if path.exists() {
            let bytes = std::fs::read(path)
                .with_context(|| format!("read template history: {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parse template history: {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            files,
        })
    }

    pub fn files(&self) -> &[TemplateFile] {
        &self.files
    }

    /// Newest upload for the type; `created_at` ties break on the higher id.
    pub fn latest(&self, template_type: TemplateType) -> Option<&TemplateFile> {
        self.files
            .iter()
            .filter(|f| f.template_type == template_type)
            .max_by_key(|f| (f.created_at, f.id))
    }

    pub fn insert(
        &mut self,
        template_type: TemplateType,
        file_url: String,
        file_name: String,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<TemplateFile> {
        let id = self.files.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        let record = TemplateFile {
            id,
            template_type,
            file_url,
            file_name,
            file_type: DOCX_CONTENT_TYPE.to_string(),
            created_at,
        };
        self.files.push(record.clone());
        self.save()?;
        Ok(record)
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create history dir: {}", parent.display()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.files).context("serialize template history")?;
        std::fs::write(&self.path, bytes)
            .with_context(|| format!("write template history: {}", self.path.display()))
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    Stored {
        template: TemplateFile,
        placeholders: Vec<String>,
    },
    /// The file parsed fine but contains placeholders the validator rejects.
    /// All failures are returned together so the user fixes them in one pass.
    Rejected { failures: Vec<ValidationResult> },
}

/// Gate an uploaded template: extension and size checks, then placeholder
/// extraction and validation. Only a fully valid file reaches the store.
#[allow(clippy::too_many_arguments)]
pub fn upload_template(
    bytes: &[u8],
    file_name: &str,
    template_type: TemplateType,
    max_upload_bytes: u64,
    registry: &dyn Registry,
    schema: &dyn SchemaOracle,
    store: &dyn BlobStore,
    history: &mut TemplateHistory,
) -> Result<UploadOutcome, TemplateError> {
    if !file_name.to_ascii_lowercase().ends_with(".docx") {
        return Err(TemplateError::InvalidExtension(file_name.to_string()));
    }
    if bytes.len() as u64 > max_upload_bytes {
        return Err(TemplateError::SizeLimitExceeded {
            size: bytes.len() as u64,
            limit: max_upload_bytes,
        });
    }

    let placeholders = extract_placeholders(bytes)?;
    let results = validate_placeholders(&placeholders, registry, schema)?;
    let failures: Vec<ValidationResult> =
        results.into_iter().filter(|r| !r.valid).collect();
    if !failures.is_empty() {
        log::info!(
            "rejecting {} template {file_name}: {} invalid placeholder(s)",
            template_type,
            failures.len()
        );
        return Ok(UploadOutcome::Rejected { failures });
    }

    let created_at = Utc::now();
    let key = format!(
        "templates/{}-{}.docx",
        template_type,
        created_at.timestamp_millis()
    );
    store.put(&key, bytes, DOCX_CONTENT_TYPE)?;
    let template = history.insert(
        template_type,
        key,
        file_name.to_string(),
        created_at,
    )?;
    log::info!(
        "stored {} template {} as {}",
        template_type,
        template.file_name,
        template.file_url
    );
    Ok(UploadOutcome::Stored {
        template,
        placeholders,
    })
}

#[derive(Debug)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Render the newest uploaded template of the given type against the
/// request's business data, falling back to preview defaults for anything
/// the request leaves out.
pub fn preview_document(
    template_type: TemplateType,
    request: &RenderRequest,
    history: &TemplateHistory,
    store: &dyn BlobStore,
) -> Result<RenderedDocument, TemplateError> {
    let record = history.latest(template_type).ok_or_else(|| {
        TemplateError::MissingTemplate(format!("no uploaded {template_type} template"))
    })?;
    let docx = store
        .get(&record.file_url)?
        .ok_or_else(|| TemplateError::MissingTemplate(record.file_url.clone()))?;

    let ctx = build_context(
        template_type,
        &request.document_data,
        &request.customer,
        &request.items,
        &request.settings,
    );
    let bytes = render_template(&docx, &ctx)?;
    Ok(RenderedDocument {
        bytes,
        file_name: format!("preview_{template_type}.docx"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::generate::generate_base_template;
    use crate::docx::testutil::docx_from_body;
    use crate::registry::{MemoryRegistry, PlaceholderEntry};
    use crate::schema::StaticSchema;
    use crate::store::FsBlobStore;
    use chrono::TimeZone;

    fn system_entry(name: &str) -> PlaceholderEntry {
        PlaceholderEntry {
            placeholder_name: name.to_string(),
            display_name: name.to_string(),
            data_source_table: "system".to_string(),
            data_source_field: name.to_string(),
            template_types_allowed: Vec::new(),
        }
    }

    fn full_registry() -> MemoryRegistry {
        let names = [
            "company_name",
            "company_address",
            "company_uen",
            "company_email",
            "customer_company",
            "customer_name",
            "customer_address",
            "customer_email",
            "document_number",
            "document_date",
            "subtotal",
            "total",
            "total_in_words",
            "signature",
        ];
        MemoryRegistry::with_entries(names.iter().map(|n| system_entry(n)).collect())
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: MemoryRegistry,
        schema: StaticSchema,
        store: FsBlobStore,
        history: TemplateHistory,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path().join("blobs"));
        let history =
            TemplateHistory::load(&dir.path().join("templates.json")).expect("history");
        Fixture {
            _dir: dir,
            registry: full_registry(),
            schema: StaticSchema::default(),
            store,
            history,
        }
    }

    #[test]
    fn valid_upload_is_stored_and_recorded() {
        let mut fx = fixture();
        let docx = generate_base_template(TemplateType::Invoice).expect("generate");
        let outcome = upload_template(
            &docx,
            "invoice_v2.docx",
            TemplateType::Invoice,
            DEFAULT_MAX_UPLOAD_BYTES,
            &fx.registry,
            &fx.schema,
            &fx.store,
            &mut fx.history,
        )
        .expect("upload");
        let UploadOutcome::Stored { template, placeholders } = outcome else {
            panic!("expected stored outcome");
        };
        assert!(placeholders.contains(&"document_number".to_string()));
        assert_eq!(
            fx.history.latest(TemplateType::Invoice).map(|f| f.id),
            Some(template.id)
        );
        assert!(fx
            .store
            .get(&template.file_url)
            .expect("get blob")
            .is_some());
    }

    #[test]
    fn wrong_extension_is_refused_up_front() {
        let mut fx = fixture();
        let err = upload_template(
            b"whatever",
            "invoice.pdf",
            TemplateType::Invoice,
            DEFAULT_MAX_UPLOAD_BYTES,
            &fx.registry,
            &fx.schema,
            &fx.store,
            &mut fx.history,
        )
        .expect_err("should refuse");
        assert!(matches!(err, TemplateError::InvalidExtension(_)));
    }

    #[test]
    fn oversized_upload_is_refused() {
        let mut fx = fixture();
        let err = upload_template(
            &[0u8; 32],
            "invoice.docx",
            TemplateType::Invoice,
            16,
            &fx.registry,
            &fx.schema,
            &fx.store,
            &mut fx.history,
        )
        .expect_err("should refuse");
        assert!(matches!(
            err,
            TemplateError::SizeLimitExceeded { size: 32, limit: 16 }
        ));
    }

    #[test]
    fn invalid_placeholders_reject_without_storing() {
        let mut fx = fixture();
        let docx = docx_from_body("<w:p><w:r><w:t>{{mystery_field}}</w:t></w:r></w:p>");
        let outcome = upload_template(
            &docx,
            "custom.docx",
            TemplateType::Quotation,
            DEFAULT_MAX_UPLOAD_BYTES,
            &fx.registry,
            &fx.schema,
            &fx.store,
            &mut fx.history,
        )
        .expect("upload");
        let UploadOutcome::Rejected { failures } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].placeholder, "mystery_field");
        assert!(fx.history.files().is_empty());
    }

    #[test]
    fn latest_breaks_created_at_ties_on_id() {
        let mut fx = fixture();
        let at = Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).single().expect("ts");
        fx.history
            .insert(TemplateType::Invoice, "templates/a.docx".into(), "a.docx".into(), at)
            .expect("insert");
        fx.history
            .insert(TemplateType::Invoice, "templates/b.docx".into(), "b.docx".into(), at)
            .expect("insert");
        fx.history
            .insert(TemplateType::Quotation, "templates/c.docx".into(), "c.docx".into(), at)
            .expect("insert");
        let latest = fx.history.latest(TemplateType::Invoice).expect("latest");
        assert_eq!(latest.file_name, "b.docx");
    }

    #[test]
    fn preview_renders_the_newest_upload() {
        let mut fx = fixture();
        let docx = generate_base_template(TemplateType::Quotation).expect("generate");
        upload_template(
            &docx,
            "quotation.docx",
            TemplateType::Quotation,
            DEFAULT_MAX_UPLOAD_BYTES,
            &fx.registry,
            &fx.schema,
            &fx.store,
            &mut fx.history,
        )
        .expect("upload");

        let request = RenderRequest::default();
        let out = preview_document(TemplateType::Quotation, &request, &fx.history, &fx.store)
            .expect("preview");
        assert_eq!(out.file_name, "preview_quotation.docx");
        let leftover = extract_placeholders(&out.bytes).expect("extract");
        assert!(leftover.is_empty(), "unexpected leftovers: {leftover:?}");
    }

    #[test]
    fn preview_without_an_upload_is_a_missing_template() {
        let fx = fixture();
        let err = preview_document(
            TemplateType::DeliveryOrder,
            &RenderRequest::default(),
            &fx.history,
            &fx.store,
        )
        .expect_err("should fail");
        assert!(matches!(err, TemplateError::MissingTemplate(_)));
    }
}
