//! Raw document storage.
//!
//! Uploaded bytes are written verbatim to `<raw_dir>/<document_id>.<ext>`
//! before any parsing happens, so every catalog entry can be traced back to
//! the exact file that produced it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::extract::extension_for;

/// Filesystem store for raw uploads.
#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, document_id: &str, content_type: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", document_id, extension_for(content_type)))
    }

    /// Persist `bytes` and return the path written.
    pub async fn put(&self, document_id: &str, content_type: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating raw storage dir {}", self.root.display()))?;
        let path = self.path_for(document_id, content_type);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Remove a stored file. Missing files are not an error.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{MIME_PDF, MIME_TEXT};

    #[tokio::test]
    async fn put_and_remove() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RawStore::new(dir.path().join("raw"));

        let path = store.put("doc-1", MIME_PDF, b"%PDF-1.4").await.unwrap();
        assert_eq!(path, dir.path().join("raw").join("doc-1.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
        // second removal is a no-op
        store.remove(&path).await.unwrap();
    }

    #[test]
    fn path_uses_content_type_extension() {
        let store = RawStore::new("data/raw");
        assert_eq!(
            store.path_for("abc", MIME_TEXT),
            PathBuf::from("data/raw/abc.txt")
        );
    }
}
