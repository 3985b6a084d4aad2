//! Image argument resolution: `<path>[:<tag>]`.

use std::path::PathBuf;

/// Tag used when an image argument names none.
pub const DEFAULT_TAG: &str = "latest";

/// An image layout path plus the reference to use inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArg {
    pub layout: PathBuf,
    pub tag: String,
}

/// Split `<path>[:<tag>]`.
///
/// The tag is whatever follows the last `:`, unless that text contains a
/// `/`, in which case the colon belongs to the path.
pub fn parse_image(arg: &str) -> Result<ImageArg, ResolveError> {
    let (path, tag) = match arg.rsplit_once(':') {
        Some((path, tag)) if !tag.contains('/') => (path, tag),
        _ => (arg, DEFAULT_TAG),
    };

    if path.is_empty() {
        return Err(ResolveError::EmptyPath(arg.to_string()));
    }
    if tag.is_empty() {
        return Err(ResolveError::EmptyTag(arg.to_string()));
    }

    Ok(ImageArg {
        layout: PathBuf::from(path),
        tag: tag.to_string(),
    })
}

/// Resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Image path cannot be empty: \"{0}\"")]
    EmptyPath(String),

    #[error("Image tag cannot be empty: \"{0}\"")]
    EmptyTag(String),
}
