//! OCI image layout engine.
//!
//! ```text
//! image/
//! ├── oci-layout           (layout marker)
//! ├── index.json           (references, via ref.name annotations)
//! └── blobs/
//!     └── sha256/
//!         └── <hex>        (manifests, configs, layers)
//! ```
//!
//! Blobs are written through a `.bale-tmp-*` file in the layout root and
//! renamed into place; [`Engine::gc`] removes any that were left behind.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bale_core::error::{BaleError, Result};
use sha2::{Digest as _, Sha256};
use tokio::sync::Mutex;

use super::{BlobReader, Engine};
use crate::oci::{parse_digest, sha256_digest, Descriptor, Index, SHA256};

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const TEMP_PREFIX: &str = ".bale-tmp-";

/// Engine backed by an OCI image layout directory.
pub struct DirEngine {
    /// Root directory of the layout
    root_dir: PathBuf,
    /// Serializes read-modify-write cycles on index.json
    index_lock: Mutex<()>,
}

impl DirEngine {
    /// Create a new, empty image layout at `path`.
    ///
    /// Fails if `path` already contains an `oci-layout` file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();

        if root_dir.join(LAYOUT_FILE).exists() {
            return Err(BaleError::InvalidArgument(format!(
                "Image layout already exists at {}",
                root_dir.display()
            )));
        }

        std::fs::create_dir_all(root_dir.join(BLOBS_DIR).join(SHA256)).map_err(|e| {
            BaleError::io(format!("create layout {}", root_dir.display()), e)
        })?;
        std::fs::write(root_dir.join(LAYOUT_FILE), LAYOUT_CONTENT)
            .map_err(|e| BaleError::io("write oci-layout", e))?;
        let index = serde_json::to_vec_pretty(&Index::default())?;
        std::fs::write(root_dir.join(INDEX_FILE), index)
            .map_err(|e| BaleError::io("write index.json", e))?;

        tracing::debug!(layout = %root_dir.display(), "Created image layout");
        Self::open(root_dir)
    }

    /// Open an existing image layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate_layout(&root_dir)?;

        Ok(Self {
            root_dir,
            index_lock: Mutex::new(()),
        })
    }

    /// Root directory of the layout.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Validate that the directory contains an OCI layout.
    fn validate_layout(root_dir: &Path) -> Result<()> {
        for (name, what) in [
            (LAYOUT_FILE, "oci-layout file"),
            (INDEX_FILE, "index.json"),
            (BLOBS_DIR, "blobs directory"),
        ] {
            if !root_dir.join(name).exists() {
                return Err(BaleError::NotFound(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    what,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Path to a blob by digest.
    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, encoded) = parse_digest(digest)?;
        Ok(self.root_dir.join(BLOBS_DIR).join(algorithm).join(encoded))
    }

    fn temp_path(&self) -> PathBuf {
        self.root_dir
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    async fn load_index(&self) -> Result<Index> {
        let path = self.root_dir.join(INDEX_FILE);
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| BaleError::io(format!("read {}", path.display()), e))?;

        serde_json::from_slice(&content).map_err(|e| {
            BaleError::SerializationError(format!("Failed to parse index.json: {}", e))
        })
    }

    /// Write index.json atomically.
    async fn save_index(&self, index: &Index) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| BaleError::io("write index.json", e))?;
        tokio::fs::rename(&temp, self.root_dir.join(INDEX_FILE))
            .await
            .map_err(|e| BaleError::io("replace index.json", e))?;
        Ok(())
    }
}

#[async_trait]
impl Engine for DirEngine {
    async fn put_blob(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_digest(data);
        let path = self.blob_path(&digest)?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(digest);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BaleError::io(format!("create {}", parent.display()), e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| BaleError::io(format!("stage blob {}", digest), e))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| BaleError::io(format!("commit blob {}", digest), e))?;

        tracing::debug!(digest = %digest, size = data.len(), "Stored blob");
        Ok(digest)
    }

    async fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BaleError::NotFound(format!("blob {}", digest)));
            }
            Err(e) => return Err(BaleError::io(format!("read blob {}", digest), e)),
        };

        // Only sha256 content can be verified; other algorithms are trusted.
        let (algorithm, _) = parse_digest(digest)?;
        if algorithm == SHA256 {
            let actual = sha256_digest(&data);
            if actual != digest {
                return Err(BaleError::CorruptBlob {
                    digest: digest.to_string(),
                    reason: format!("content hashes to {}", actual),
                });
            }
        }

        Ok(data)
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobReader> {
        let path = self.blob_path(digest)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file.into_std().await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BaleError::NotFound(format!("blob {}", digest)));
            }
            Err(e) => return Err(BaleError::io(format!("open blob {}", digest), e)),
        };

        let (algorithm, _) = parse_digest(digest)?;
        if algorithm == SHA256 {
            Ok(Box::new(VerifyingReader::new(file, digest.to_string())))
        } else {
            Ok(Box::new(file))
        }
    }

    async fn list_blobs(&self) -> Result<Vec<String>> {
        let blobs_dir = self.root_dir.join(BLOBS_DIR);
        let mut digests = Vec::new();

        let mut algorithms = tokio::fs::read_dir(&blobs_dir)
            .await
            .map_err(|e| list_err(&blobs_dir, e))?;
        while let Some(alg_entry) = algorithms
            .next_entry()
            .await
            .map_err(|e| list_err(&blobs_dir, e))?
        {
            let alg_dir = alg_entry.path();
            let file_type = alg_entry.file_type().await.map_err(|e| list_err(&alg_dir, e))?;
            if !file_type.is_dir() {
                continue;
            }
            let algorithm = alg_entry.file_name().to_string_lossy().into_owned();

            let mut entries = tokio::fs::read_dir(&alg_dir)
                .await
                .map_err(|e| list_err(&alg_dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| list_err(&alg_dir, e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| list_err(&entry.path(), e))?;
                if !file_type.is_file() {
                    continue;
                }
                let digest = format!("{}:{}", algorithm, entry.file_name().to_string_lossy());
                // Skip anything that does not name a valid digest
                if parse_digest(&digest).is_ok() {
                    digests.push(digest);
                }
            }
        }

        digests.sort();
        Ok(digests)
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        let path = self.blob_path(digest)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BaleError::io(format!("delete blob {}", digest), e)),
        }
    }

    async fn put_reference(&self, name: &str, descriptor: &Descriptor) -> Result<()> {
        if name.is_empty() {
            return Err(BaleError::InvalidArgument(
                "reference name cannot be empty".to_string(),
            ));
        }

        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.manifests.retain(|d| d.ref_name() != Some(name));
        index.manifests.push(descriptor.clone().with_ref_name(name));
        self.save_index(&index).await?;

        tracing::debug!(name, digest = %descriptor.digest, "Updated reference");
        Ok(())
    }

    async fn get_reference(&self, name: &str) -> Result<Descriptor> {
        let index = self.load_index().await?;
        index
            .manifests
            .into_iter()
            .find(|d| d.ref_name() == Some(name))
            .ok_or_else(|| BaleError::NotFound(format!("reference {}", name)))
    }

    async fn delete_reference(&self, name: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        let before = index.manifests.len();
        index.manifests.retain(|d| d.ref_name() != Some(name));
        if index.manifests.len() == before {
            return Err(BaleError::NotFound(format!("reference {}", name)));
        }
        self.save_index(&index).await
    }

    async fn list_references(&self) -> Result<Vec<String>> {
        let index = self.load_index().await?;
        let mut names: Vec<String> = Vec::new();
        for name in index.manifests.iter().filter_map(|d| d.ref_name()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Every `index.json` entry. Tagged entries overlap with the named
    /// references; untagged and repeated names are only reachable here.
    async fn pinned_descriptors(&self) -> Result<Vec<Descriptor>> {
        Ok(self.load_index().await?.manifests)
    }

    async fn gc(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut removed = 0usize;

        let mut entries = tokio::fs::read_dir(&self.root_dir)
            .await
            .map_err(|e| list_err(&self.root_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| list_err(&self.root_dir, e))?
        {
            if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| BaleError::io(format!("stat {}", path.display()), e))?;
            let result = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| BaleError::io(format!("remove {}", path.display()), e))?;
            removed += 1;
        }

        tracing::debug!(removed, "Removed stale staging files");
        Ok(())
    }
}

fn list_err(path: &Path, e: std::io::Error) -> BaleError {
    BaleError::io(format!("list {}", path.display()), e)
}

/// Hashes everything read through it and fails at EOF on a digest mismatch.
struct VerifyingReader<R> {
    inner: R,
    hasher: Sha256,
    expected: String,
    verified: bool,
}

impl<R: Read> VerifyingReader<R> {
    fn new(inner: R, expected: String) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            verified: false,
        }
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        } else if !buf.is_empty() && !self.verified {
            let actual = format!(
                "{}:{}",
                SHA256,
                hex::encode(std::mem::take(&mut self.hasher).finalize())
            );
            if actual != self.expected {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("blob {} content hashes to {}", self.expected, actual),
                ));
            }
            self.verified = true;
        }
        Ok(n)
    }
}
