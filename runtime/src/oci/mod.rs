//! OCI image support.
//!
//! Typed descriptors and payload schemas, plus the blob decoder that turns
//! a descriptor into a [`Blob`] by fetching it from an [`crate::cas::Engine`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Blob graph                                 │
//! │                                                               │
//! │  reference "latest"                                           │
//! │      └── index / manifest                                     │
//! │              ├── config        (image configuration)          │
//! │              ├── layers[..]    (filesystem layers)            │
//! │              └── subject       (optional, another manifest)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod blob;
mod descriptor;
mod image;
mod schema;

pub use blob::{from_descriptor, Blob};
pub use descriptor::{
    digest_filename, media_types, parse_digest, sha256_digest, Descriptor, ANNOTATION_REF_NAME,
    SHA256,
};
pub use image::ImageRuntimeConfig;
pub use schema::{Index, Manifest, MediaKind, Payload};
