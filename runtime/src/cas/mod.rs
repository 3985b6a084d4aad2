//! Content-addressable storage engines.
//!
//! An [`Engine`] stores blobs keyed by digest and a set of named references
//! pointing at descriptors. Two implementations are provided:
//!
//! - [`DirEngine`]: an OCI image layout directory on disk
//! - [`MemoryEngine`]: a HashMap-backed store used by tests and embedders
//!
//! Engines own their locking discipline. Garbage collection assumes it is
//! the only writer for the duration of a run and does not enforce it.

mod dir;
mod memory;

use std::io::Read;

use async_trait::async_trait;
use bale_core::error::Result;

use crate::oci::Descriptor;

pub use dir::DirEngine;
pub use memory::MemoryEngine;

/// Synchronous reader over a blob's bytes.
pub type BlobReader = Box<dyn Read + Send>;

/// Storage contract consumed by the blob decoder, GC and unpacking.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Store `data` and return its digest.
    async fn put_blob(&self, data: &[u8]) -> Result<String>;

    /// Read a whole blob. Fails with `NotFound` if absent, `CorruptBlob`
    /// if the engine verifies content and it does not match the digest.
    async fn get_blob(&self, digest: &str) -> Result<Vec<u8>>;

    /// Open a blob for streaming. Verifying engines report a digest
    /// mismatch as an `InvalidData` I/O error at end of stream.
    async fn open_blob(&self, digest: &str) -> Result<BlobReader>;

    /// Snapshot of every blob digest in the store.
    async fn list_blobs(&self) -> Result<Vec<String>>;

    /// Delete a blob. Deleting an absent blob succeeds.
    async fn delete_blob(&self, digest: &str) -> Result<()>;

    /// Point `name` at `descriptor`, replacing any previous target.
    async fn put_reference(&self, name: &str, descriptor: &Descriptor) -> Result<()>;

    /// Resolve a reference. Fails with `NotFound` if `name` is unknown.
    async fn get_reference(&self, name: &str) -> Result<Descriptor>;

    /// Remove a reference. Fails with `NotFound` if `name` is unknown.
    async fn delete_reference(&self, name: &str) -> Result<()>;

    /// Names of all references.
    async fn list_references(&self) -> Result<Vec<String>>;

    /// Descriptors the store holds on to outside of its named references,
    /// such as untagged or same-named `index.json` entries. GC treats them
    /// as roots. Engines without such entries return nothing.
    async fn pinned_descriptors(&self) -> Result<Vec<Descriptor>> {
        Ok(Vec::new())
    }

    /// Reclaim physical space after a sweep.
    async fn gc(&self) -> Result<()>;
}

/// Store `data` and build its descriptor.
pub async fn put_blob_with(
    engine: &dyn Engine,
    media_type: &str,
    data: &[u8],
) -> Result<Descriptor> {
    let digest = engine.put_blob(data).await?;
    Ok(Descriptor::new(media_type, digest, data.len() as i64))
}

/// Serialize `value` as JSON, store it and build its descriptor.
pub async fn put_json<T: serde::Serialize + Sync>(
    engine: &dyn Engine,
    media_type: &str,
    value: &T,
) -> Result<Descriptor> {
    let data = serde_json::to_vec(value)?;
    put_blob_with(engine, media_type, &data).await
}
