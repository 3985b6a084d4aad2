//! Bundle metadata file.

use std::fs;
use std::path::Path;

use bale_core::error::{BaleError, Result};
use serde::{Deserialize, Serialize};

use super::idmap::MapOptions;
use crate::oci::Descriptor;

/// Name of the metadata file inside a bundle.
pub const META_NAME: &str = "bale.json";

/// Records where a bundle came from and how it was unpacked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    /// Version of the tool that unpacked the bundle
    pub version: String,
    /// Manifest descriptor the bundle was unpacked from
    pub from: Descriptor,
    pub map_options: MapOptions,
}

impl BundleMeta {
    pub fn new(from: Descriptor, map_options: MapOptions) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            from,
            map_options,
        }
    }

    /// Write `bale.json` into `bundle`.
    pub fn write(&self, bundle: &Path) -> Result<()> {
        let path = bundle.join(META_NAME);
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&path, data)
            .map_err(|e| BaleError::io(format!("Failed to write {}", path.display()), e))?;
        tracing::debug!(
            version = %self.version,
            from = %self.from.digest,
            meta = %path.display(),
            "Saved bundle metadata"
        );
        Ok(())
    }

    /// Read `bale.json` from `bundle`.
    pub fn read(bundle: &Path) -> Result<Self> {
        let path = bundle.join(META_NAME);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BaleError::NotFound(format!("bundle metadata {}", path.display()))
            } else {
                BaleError::io(format!("Failed to read {}", path.display()), e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::media_types;
    use bale_core::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let from = Descriptor::for_bytes(media_types::IMAGE_MANIFEST, b"{}");
        let meta = BundleMeta::new(from, MapOptions::rootless(1000, 1000));

        meta.write(temp.path()).unwrap();
        let loaded = BundleMeta::read(temp.path()).unwrap();

        assert_eq!(loaded, meta);
        assert_eq!(loaded.version, crate::VERSION);
    }

    #[test]
    fn test_file_layout() {
        let temp = TempDir::new().unwrap();
        let from = Descriptor::for_bytes(media_types::IMAGE_MANIFEST, b"{}");
        BundleMeta::new(from.clone(), MapOptions::default())
            .write(temp.path())
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(temp.path().join(META_NAME)).unwrap()).unwrap();
        assert_eq!(raw["from"]["mediaType"], media_types::IMAGE_MANIFEST);
        assert_eq!(raw["from"]["digest"], from.digest);
        assert_eq!(raw["map_options"]["rootless"], false);
    }

    #[test]
    fn test_read_missing() {
        let temp = TempDir::new().unwrap();
        let err = BundleMeta::read(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
