//! Content descriptors and digests.

use std::collections::BTreeMap;

use bale_core::error::{BaleError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Media types understood by the blob decoder.
pub mod media_types {
    pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

    pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const IMAGE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
    pub const IMAGE_LAYER_NONDISTRIBUTABLE: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar";
    pub const IMAGE_LAYER_NONDISTRIBUTABLE_GZIP: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

/// Annotation carrying a reference name on an `index.json` entry.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// The only digest algorithm the store writes.
pub const SHA256: &str = "sha256";

/// A typed pointer to a blob. Identity is the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Platform record; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            urls: None,
            annotations: None,
            platform: None,
            artifact_type: None,
        }
    }

    /// Descriptor for `data`, digested with sha256.
    pub fn for_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, sha256_digest(data), data.len() as i64)
    }

    /// Value of the reference-name annotation, if present.
    pub fn ref_name(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_REF_NAME))
            .map(|s| s.as_str())
    }

    /// Set the reference-name annotation.
    pub fn with_ref_name(mut self, name: &str) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION_REF_NAME.to_string(), name.to_string());
        self
    }
}

/// Compute `sha256:<hex>` for a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}:{}", SHA256, hex::encode(Sha256::digest(data)))
}

/// Split and validate a digest into `(algorithm, encoded)`.
///
/// Only lowercase hex encodings are accepted so a digest can never name a
/// path outside its algorithm directory.
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| BaleError::InvalidArgument(format!("malformed digest: {}", digest)))?;

    let valid_algorithm = !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
    let valid_encoded =
        !encoded.is_empty() && encoded.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));

    if !valid_algorithm || !valid_encoded {
        return Err(BaleError::InvalidArgument(format!(
            "malformed digest: {}",
            digest
        )));
    }

    if algorithm == SHA256 && encoded.len() != 64 {
        return Err(BaleError::InvalidArgument(format!(
            "malformed sha256 digest (expected 64 hex chars): {}",
            digest
        )));
    }

    Ok((algorithm, encoded))
}

/// Filesystem-safe form of a digest (`sha256:abc` -> `sha256_abc`).
pub fn digest_filename(digest: &str) -> String {
    digest.replacen(':', "_", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_digest_of_empty() {
        assert_eq!(sha256_digest(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_for_bytes() {
        let desc = Descriptor::for_bytes(media_types::IMAGE_CONFIG, b"");
        assert_eq!(desc.digest, EMPTY_SHA256);
        assert_eq!(desc.size, 0);
        assert_eq!(desc.media_type, media_types::IMAGE_CONFIG);
    }

    #[test]
    fn test_parse_digest() {
        let (alg, hex) = parse_digest(EMPTY_SHA256).unwrap();
        assert_eq!(alg, "sha256");
        assert_eq!(hex.len(), 64);
    }

    #[test]
    fn test_parse_digest_rejects_traversal() {
        assert!(parse_digest("sha256:../../etc/passwd").is_err());
        assert!(parse_digest("../x:abcd").is_err());
        assert!(parse_digest("nodigest").is_err());
        assert!(parse_digest("sha256:ABCDEF").is_err());
        assert!(parse_digest("sha256:abc").is_err());
    }

    #[test]
    fn test_parse_digest_other_algorithm() {
        let (alg, hex) = parse_digest("sha512:abc123").unwrap();
        assert_eq!(alg, "sha512");
        assert_eq!(hex, "abc123");
    }

    #[test]
    fn test_digest_filename() {
        assert_eq!(digest_filename("sha256:abc"), "sha256_abc");
    }

    #[test]
    fn test_ref_name_annotation() {
        let desc = Descriptor::new(media_types::IMAGE_MANIFEST, EMPTY_SHA256, 0);
        assert_eq!(desc.ref_name(), None);

        let desc = desc.with_ref_name("latest");
        assert_eq!(desc.ref_name(), Some("latest"));
    }

    #[test]
    fn test_descriptor_json_shape() {
        let desc = Descriptor::new(media_types::IMAGE_MANIFEST, EMPTY_SHA256, 7);
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mediaType"], media_types::IMAGE_MANIFEST);
        assert_eq!(json["size"], 7);
        assert!(json.get("annotations").is_none());
    }
}
