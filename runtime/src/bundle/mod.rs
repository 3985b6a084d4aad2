//! Unpacking a tagged image into a runtime bundle.
//!
//! A bundle directory holds:
//!
//! - `rootfs/`: the image's layers applied in order
//! - `config.json`: runtime configuration derived from the image config
//! - `<alg>_<hex>.mtree`: manifest of `rootfs/` as unpacked
//! - `bale.json`: where the bundle came from and the mapping options used

mod idmap;
mod layer;
mod meta;
mod mtree;
mod runtime_config;

use std::path::Path;

use bale_core::error::{BaleError, Result};

use crate::cas::Engine;
use crate::oci::{from_descriptor, media_types, ImageRuntimeConfig, Payload};

pub use idmap::{IdMapping, MapOptions};
pub use layer::{apply_layer, Compression, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
pub use meta::{BundleMeta, META_NAME};
pub use mtree::{manifest_name as mtree_name, KEYWORDS as MTREE_KEYWORDS};
pub use runtime_config::{resolve_user, CONFIG_NAME};

/// Name of the root filesystem directory inside a bundle.
pub const ROOTFS_NAME: &str = "rootfs";

fn task_error(e: tokio::task::JoinError) -> BaleError {
    BaleError::io(
        "unpack task",
        std::io::Error::new(std::io::ErrorKind::Other, e),
    )
}

/// Unpack the image tagged `name` into `bundle`.
///
/// Only image manifests can be unpacked; references to an index or any
/// other media type fail with `UnsupportedSchema`. The bundle directory is
/// created if needed, but its `rootfs/` must not already exist.
pub async fn unpack(
    engine: &dyn Engine,
    name: &str,
    bundle: &Path,
    options: &MapOptions,
) -> Result<BundleMeta> {
    let from = engine.get_reference(name).await?;
    if from.media_type != media_types::IMAGE_MANIFEST {
        return Err(BaleError::UnsupportedSchema {
            media_type: from.media_type.clone(),
        });
    }

    let manifest = match from_descriptor(engine, &from).await?.payload {
        Payload::Manifest(manifest) => manifest,
        other => {
            return Err(BaleError::UnsupportedSchema {
                media_type: format!("{:?}", other.kind()),
            })
        }
    };

    let config_blob = from_descriptor(engine, &manifest.config).await?;
    if !matches!(config_blob.payload, Payload::ImageConfig(_)) {
        return Err(BaleError::UnsupportedSchema {
            media_type: manifest.config.media_type.clone(),
        });
    }
    let image = ImageRuntimeConfig::from_bytes(&manifest.config.digest, &config_blob.raw)?;

    // Reject unsupported layers before touching the filesystem.
    for layer in &manifest.layers {
        Compression::for_media_type(&layer.media_type)?;
    }

    tracing::debug!(
        reference = name,
        bundle = %bundle.display(),
        rootfs = ROOTFS_NAME,
        layers = manifest.layers.len(),
        "Unpacking OCI image"
    );

    tokio::fs::create_dir_all(bundle).await.map_err(|e| {
        BaleError::io(format!("Failed to create bundle {}", bundle.display()), e)
    })?;
    let rootfs = bundle.join(ROOTFS_NAME);
    tokio::fs::create_dir(&rootfs).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            BaleError::InvalidArgument(format!("{} already exists", rootfs.display()))
        } else {
            BaleError::io(format!("Failed to create rootfs {}", rootfs.display()), e)
        }
    })?;

    for layer in &manifest.layers {
        let reader = engine.open_blob(&layer.digest).await?;
        let descriptor = layer.clone();
        let target = rootfs.clone();
        let layer_options = options.clone();
        tokio::task::spawn_blocking(move || {
            apply_layer(reader, &descriptor, &target, &layer_options)
        })
        .await
        .map_err(task_error)??;
    }

    let config = runtime_config::generate(&image, &rootfs, options)?;
    runtime_config::write(bundle, &config)?;

    let mtree_path = bundle.join(mtree::manifest_name(&from.digest));
    let walk_root = rootfs.clone();
    let walk_options = options.clone();
    let manifest_text =
        tokio::task::spawn_blocking(move || mtree::generate(&walk_root, &walk_options))
            .await
            .map_err(task_error)??;
    mtree::write_manifest(&mtree_path, &manifest_text)?;

    let meta = BundleMeta::new(from, options.clone());
    meta.write(bundle)?;

    tracing::info!(
        reference = name,
        bundle = %bundle.display(),
        digest = %meta.from.digest,
        "Unpacked OCI image"
    );
    Ok(meta)
}
