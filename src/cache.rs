//! Content-addressed result cache
//!
//! Maps a hash of the request content to a previously computed result, shared
//! by the recognition and synthesis paths. Keys are derived by the caller;
//! identical inputs are assumed to produce identical outputs, so entries are
//! immutable and writes are idempotent. Files are written to a temporary
//! sibling and renamed into place so readers never observe partial writes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Hex sha256 of a byte payload
#[must_use]
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex sha256 of a text payload
#[must_use]
pub fn sha256_text(text: &str) -> String {
    sha256_bytes(text.as_bytes())
}

/// Cache key for a synthesis request signature (text|voice|rate|encoding)
#[must_use]
pub fn synthesis_key(text: &str, voice: &str, speed: f32, encoding: &str) -> String {
    sha256_text(&format!("{text}||{voice}||{speed}||{encoding}"))
}

/// Append-only content-addressed store rooted at one directory
///
/// Safe for concurrent reads; concurrent writes to the same key produce the
/// same bytes, so the last rename wins harmlessly.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Create a cache rooted at `dir` (created lazily on first put)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up a text entry
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.join(format!("{key}.txt"))).ok()
    }

    /// Store a text entry, returning its path
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the directory or file cannot be written.
    pub fn put_text(&self, key: &str, text: &str) -> Result<PathBuf> {
        self.put_file(key, "txt", text.as_bytes())
    }

    /// Look up a file entry with the given extension
    #[must_use]
    pub fn get_file(&self, key: &str, ext: &str) -> Option<PathBuf> {
        let path = self.dir.join(format!("{key}.{ext}"));
        path.exists().then_some(path)
    }

    /// Store a file entry, returning its path
    ///
    /// Skipped (returning the existing path) when the key is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the directory or file cannot be written.
    pub fn put_file(&self, key: &str, ext: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{key}.{ext}"));
        if path.exists() {
            return Ok(path);
        }
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Cache(format!("create {}: {e}", self.dir.display())))?;
        let tmp = self.dir.join(format!(".{key}.{ext}.tmp"));
        std::fs::write(&tmp, data)
            .map_err(|e| Error::Cache(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Cache(format!("rename {}: {e}", path.display())))?;
        tracing::debug!(key, ext, bytes = data.len(), "cache entry stored");
        Ok(path)
    }
}
