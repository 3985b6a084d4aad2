//! bale runtime: OCI image layout storage, garbage collection and bundle
//! unpacking.
//!
//! - [`cas`]: content-addressable storage engines
//! - [`oci`]: descriptors, schema records and blob decoding
//! - [`gc`]: mark-and-sweep collection over an engine
//! - [`bundle`]: unpacking a tagged image into a runtime bundle

#![allow(clippy::result_large_err)]

#[cfg(unix)]
pub mod bundle;
pub mod cas;
pub mod gc;
pub mod oci;

// Re-export common types
#[cfg(unix)]
pub use bundle::{unpack, BundleMeta, IdMapping, MapOptions};
pub use cas::{put_blob_with, put_json, BlobReader, DirEngine, Engine, MemoryEngine};
pub use gc::{gc, reachable, Collector, GcOptions, GcReport, GcState, Root};
pub use oci::{from_descriptor, Blob, Descriptor, ImageRuntimeConfig, Index, Manifest, Payload};

/// bale runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
