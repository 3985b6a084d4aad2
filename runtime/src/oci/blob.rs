//! Blob decoding: fetch a descriptor's content and decode it by media type.

use bale_core::error::{BaleError, Result};

use super::descriptor::Descriptor;
use super::schema::{MediaKind, Payload};
use crate::cas::Engine;

/// A fetched and decoded blob.
#[derive(Debug, Clone)]
pub struct Blob {
    pub descriptor: Descriptor,
    /// Raw bytes. Empty for layers, which are verified by streaming.
    pub raw: Vec<u8>,
    pub payload: Payload,
}

/// Fetch and decode the blob a descriptor points at.
///
/// # Errors
///
/// - `UnsupportedSchema` if the media type is not a known schema
/// - `NotFound` if the blob is absent
/// - `CorruptBlob` on digest or size mismatch, or unparsable content
/// - `Io` on store read failure
pub async fn from_descriptor(engine: &dyn Engine, descriptor: &Descriptor) -> Result<Blob> {
    let kind = MediaKind::classify(&descriptor.media_type)?;

    let (raw, length) = match kind {
        MediaKind::Layer => {
            let reader = engine.open_blob(&descriptor.digest).await?;
            let length = drain_layer(reader, &descriptor.digest).await?;
            (Vec::new(), length)
        }
        _ => {
            let raw = engine.get_blob(&descriptor.digest).await?;
            let length = raw.len() as u64;
            (raw, length)
        }
    };

    if descriptor.size >= 0 && descriptor.size as u64 != length {
        return Err(BaleError::CorruptBlob {
            digest: descriptor.digest.clone(),
            reason: format!(
                "size mismatch: descriptor says {}, blob has {}",
                descriptor.size, length
            ),
        });
    }

    let payload = Payload::decode(kind, &descriptor.digest, &raw)?;

    tracing::trace!(
        digest = %descriptor.digest,
        kind = ?kind,
        size = length,
        "Decoded blob"
    );

    Ok(Blob {
        descriptor: descriptor.clone(),
        raw,
        payload,
    })
}

/// Read a layer stream to the end so its digest is checked.
async fn drain_layer(mut reader: crate::cas::BlobReader, digest: &str) -> Result<u64> {
    let digest = digest.to_string();
    tokio::task::spawn_blocking(move || {
        std::io::copy(&mut reader, &mut std::io::sink()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                BaleError::CorruptBlob {
                    digest: digest.clone(),
                    reason: e.to_string(),
                }
            } else {
                BaleError::io(format!("read layer {}", digest), e)
            }
        })
    })
    .await
    .map_err(|e| {
        BaleError::io(
            "layer verification task",
            std::io::Error::new(std::io::ErrorKind::Other, e),
        )
    })?
}
