//! Typed OCI payload schemas.
//!
//! Each blob is decoded into a [`Payload`] selected by its media type.
//! Records only declare the fields the store needs; unknown fields are
//! ignored and missing optional fields decode as empty.

use std::collections::BTreeMap;

use bale_core::error::{BaleError, Result};
use serde::{Deserialize, Serialize};

use super::descriptor::{media_types, Descriptor};

/// Image manifest: one config plus an ordered list of layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::IMAGE_MANIFEST.to_string()),
            artifact_type: None,
            config,
            layers,
            subject: None,
            annotations: None,
        }
    }
}

/// Image index: a list of manifests (also the shape of `index.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::IMAGE_INDEX.to_string()),
            artifact_type: None,
            manifests: Vec::new(),
            subject: None,
            annotations: None,
        }
    }
}

fn default_schema_version() -> u32 {
    2
}

/// Schema family of a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Manifest,
    Index,
    ImageConfig,
    Layer,
}

impl MediaKind {
    /// Classify a media type. Anything outside the known families,
    /// including Docker manifest lists, is `UnsupportedSchema`.
    pub fn classify(media_type: &str) -> Result<Self> {
        use media_types::*;

        match media_type {
            IMAGE_MANIFEST | DOCKER_MANIFEST => Ok(Self::Manifest),
            IMAGE_INDEX => Ok(Self::Index),
            IMAGE_CONFIG | DOCKER_CONFIG => Ok(Self::ImageConfig),
            IMAGE_LAYER
            | IMAGE_LAYER_GZIP
            | IMAGE_LAYER_ZSTD
            | IMAGE_LAYER_NONDISTRIBUTABLE
            | IMAGE_LAYER_NONDISTRIBUTABLE_GZIP
            | DOCKER_LAYER_GZIP => Ok(Self::Layer),
            other => Err(BaleError::UnsupportedSchema {
                media_type: other.to_string(),
            }),
        }
    }
}

/// Decoded blob contents, tagged by schema family.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Manifest(Manifest),
    Index(Index),
    /// Image configuration, kept as a JSON object; it holds no descriptors.
    ImageConfig(serde_json::Value),
    /// Layer archive; its bytes are never interpreted by the graph code.
    Layer,
}

impl Payload {
    /// Decode raw bytes as the schema named by `kind`.
    ///
    /// Parse failures are reported as `CorruptBlob` against `digest`.
    pub fn decode(kind: MediaKind, digest: &str, data: &[u8]) -> Result<Self> {
        let corrupt = |e: serde_json::Error| BaleError::CorruptBlob {
            digest: digest.to_string(),
            reason: format!("does not parse as {:?}: {}", kind, e),
        };

        match kind {
            MediaKind::Manifest => Ok(Self::Manifest(serde_json::from_slice(data).map_err(corrupt)?)),
            MediaKind::Index => Ok(Self::Index(serde_json::from_slice(data).map_err(corrupt)?)),
            MediaKind::ImageConfig => {
                let value: serde_json::Value = serde_json::from_slice(data).map_err(corrupt)?;
                if !value.is_object() {
                    return Err(BaleError::CorruptBlob {
                        digest: digest.to_string(),
                        reason: "image configuration is not a JSON object".to_string(),
                    });
                }
                Ok(Self::ImageConfig(value))
            }
            MediaKind::Layer => Ok(Self::Layer),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Manifest(_) => MediaKind::Manifest,
            Self::Index(_) => MediaKind::Index,
            Self::ImageConfig(_) => MediaKind::ImageConfig,
            Self::Layer => MediaKind::Layer,
        }
    }
}
