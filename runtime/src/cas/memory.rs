//! In-memory engine.
//!
//! Content is not verified against its digest, so callers may insert
//! blobs under arbitrary digests (for example to build a cyclic graph).
//! Fetches are counted per digest and individual operations can be made
//! to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;

use async_trait::async_trait;
use bale_core::error::{BaleError, Result};
use parking_lot::Mutex;

use super::{BlobReader, Engine};
use crate::oci::{sha256_digest, Descriptor};

#[derive(Default)]
struct State {
    blobs: BTreeMap<String, Vec<u8>>,
    references: Vec<(String, Descriptor)>,
    fetches: HashMap<String, usize>,
    failing_deletes: HashSet<String>,
    failing_gc: bool,
    gc_calls: usize,
}

/// HashMap-backed engine.
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `digest` without checking that they match.
    pub fn insert_raw(&self, digest: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.state.lock().blobs.insert(digest.into(), data.into());
    }

    /// Number of `get_blob`/`open_blob` calls made for `digest`.
    pub fn fetch_count(&self, digest: &str) -> usize {
        self.state.lock().fetches.get(digest).copied().unwrap_or(0)
    }

    /// Total fetches across all digests.
    pub fn total_fetches(&self) -> usize {
        self.state.lock().fetches.values().sum()
    }

    /// Make `delete_blob(digest)` fail with an I/O error.
    pub fn fail_delete(&self, digest: impl Into<String>) {
        self.state.lock().failing_deletes.insert(digest.into());
    }

    /// Make `gc()` fail with an I/O error.
    pub fn fail_gc(&self) {
        self.state.lock().failing_gc = true;
    }

    /// Number of successful `gc()` calls.
    pub fn gc_calls(&self) -> usize {
        self.state.lock().gc_calls
    }

    fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        *state.fetches.entry(digest.to_string()).or_insert(0) += 1;
        state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| BaleError::NotFound(format!("blob {}", digest)))
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn put_blob(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_digest(data);
        self.state
            .lock()
            .blobs
            .insert(digest.clone(), data.to_vec());
        Ok(digest)
    }

    async fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.fetch(digest)
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobReader> {
        Ok(Box::new(Cursor::new(self.fetch(digest)?)))
    }

    async fn list_blobs(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().blobs.keys().cloned().collect())
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_deletes.contains(digest) {
            return Err(BaleError::io(
                format!("delete blob {}", digest),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
            ));
        }
        state.blobs.remove(digest);
        Ok(())
    }

    async fn put_reference(&self, name: &str, descriptor: &Descriptor) -> Result<()> {
        let mut state = self.state.lock();
        state.references.retain(|(n, _)| n != name);
        state
            .references
            .push((name.to_string(), descriptor.clone()));
        Ok(())
    }

    async fn get_reference(&self, name: &str) -> Result<Descriptor> {
        self.state
            .lock()
            .references
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| BaleError::NotFound(format!("reference {}", name)))
    }

    async fn delete_reference(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.references.len();
        state.references.retain(|(n, _)| n != name);
        if state.references.len() == before {
            return Err(BaleError::NotFound(format!("reference {}", name)));
        }
        Ok(())
    }

    async fn list_references(&self) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .references
            .iter()
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn gc(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_gc {
            return Err(BaleError::io(
                "compact store",
                std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            ));
        }
        state.gc_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::media_types;
    use bale_core::ErrorKind;
    use std::io::Read;

    #[tokio::test]
    async fn test_put_get_counts_fetches() {
        let engine = MemoryEngine::new();
        let digest = engine.put_blob(b"data").await.unwrap();

        assert_eq!(engine.fetch_count(&digest), 0);
        engine.get_blob(&digest).await.unwrap();
        let mut buf = Vec::new();
        engine
            .open_blob(&digest)
            .await
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"data");
        assert_eq!(engine.fetch_count(&digest), 2);
        assert_eq!(engine.total_fetches(), 2);
    }

    #[tokio::test]
    async fn test_insert_raw_skips_verification() {
        let engine = MemoryEngine::new();
        engine.insert_raw("sha256:fake", b"anything".to_vec());
        assert_eq!(engine.get_blob("sha256:fake").await.unwrap(), b"anything");
    }

    #[tokio::test]
    async fn test_references() {
        let engine = MemoryEngine::new();
        let desc = Descriptor::for_bytes(media_types::IMAGE_MANIFEST, b"m");

        engine.put_reference("latest", &desc).await.unwrap();
        assert_eq!(engine.get_reference("latest").await.unwrap(), desc);
        assert_eq!(engine.list_references().await.unwrap(), vec!["latest"]);

        engine.delete_reference("latest").await.unwrap();
        let err = engine.get_reference("latest").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let engine = MemoryEngine::new();
        let digest = engine.put_blob(b"x").await.unwrap();

        engine.fail_delete(digest.clone());
        assert_eq!(engine.delete_blob(&digest).await.unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(engine.list_blobs().await.unwrap(), vec![digest]);

        engine.gc().await.unwrap();
        engine.fail_gc();
        assert!(engine.gc().await.is_err());
        assert_eq!(engine.gc_calls(), 1);
    }
}
