use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::TemplateError;

/// A DOCX container held fully in memory. Entry order, per-entry compression
/// and metadata are preserved so a rewrite round-trips cleanly.
#[derive(Debug)]
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

#[derive(Debug)]
pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

/// Parts scanned for placeholders: the main body plus any header/footer
/// parts. Styles, settings and media are never scanned.
pub fn scannable_part(name: &str) -> bool {
    name == "word/document.xml"
        || (name.starts_with("word/header") && name.ends_with(".xml"))
        || (name.starts_with("word/footer") && name.ends_with(".xml"))
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TemplateError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| TemplateError::MalformedArchive(format!("not a ZIP container: {e}")))?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| TemplateError::MalformedArchive(format!("zip entry {i}: {e}")))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| TemplateError::MalformedArchive(format!("read {}: {e}", file.name())))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    /// Re-serialize the archive, substituting the given part bytes by entry
    /// name. Untouched entries (media, styles) are copied through unchanged
    /// with their original compression method.
    pub fn to_bytes_with_replacements(
        &self,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<Vec<u8>> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        let cursor = zout.finish().context("finish zip")?;
        Ok(cursor.into_inner())
    }

    pub fn part(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
