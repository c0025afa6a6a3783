use std::path::PathBuf;

use anyhow::Context;

/// Content-addressable blob storage keyed by opaque string. Template and
/// output documents are stored purely as bytes under such keys.
pub trait BlobStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<()>;
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Filesystem-backed store rooted at a directory; keys map to relative paths.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> anyhow::Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create blob dir: {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("write blob: {}", path.display()))?;
        log::debug!("stored blob {key} ({} bytes)", bytes.len());
        Ok(())
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.resolve(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read(&path)
            .map(Some)
            .with_context(|| format!("read blob: {}", path.display()))
    }
}
