//! mtree manifests of an unpacked rootfs.
//!
//! The manifest records every path under the rootfs with the keywords in
//! [`KEYWORDS`], one full-path entry per line, sorted by path. Owners are
//! recorded as the container sees them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use bale_core::error::{BaleError, Result};
use sha2::{Digest as _, Sha256};

use super::idmap::MapOptions;
use crate::oci::digest_filename;

/// Keywords written for each entry.
pub const KEYWORDS: &[&str] = &["type", "mode", "uid", "gid", "size", "sha256digest", "link"];

/// File name of the manifest for an image manifest digest.
pub fn manifest_name(digest: &str) -> String {
    format!("{}.mtree", digest_filename(digest))
}

/// Generate the manifest text for `rootfs`.
pub fn generate(rootfs: &Path, options: &MapOptions) -> Result<String> {
    let mut out = String::from("#mtree v1.0\n");
    out.push_str(&format!("#keywords: {}\n", KEYWORDS.join(" ")));
    walk(rootfs, ".", options, &mut out)?;
    Ok(out)
}

/// Write `content` to `path`. Fails if `path` already exists.
pub fn write_manifest(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| BaleError::io(format!("Failed to create mtree {}", path.display()), e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| BaleError::io(format!("Failed to write mtree {}", path.display()), e))?;
    tracing::debug!(mtree = %path.display(), "Saved mtree manifest");
    Ok(())
}

fn walk(path: &Path, name: &str, options: &MapOptions, out: &mut String) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| BaleError::io(format!("Failed to stat {}", path.display()), e))?;
    let file_type = meta.file_type();

    let kind = if file_type.is_dir() {
        "dir"
    } else if file_type.is_symlink() {
        "link"
    } else if file_type.is_file() {
        "file"
    } else if file_type.is_char_device() {
        "char"
    } else if file_type.is_block_device() {
        "block"
    } else if file_type.is_fifo() {
        "fifo"
    } else {
        "socket"
    };

    out.push_str(&format!(
        "{} type={} mode={:04o} uid={} gid={}",
        name,
        kind,
        meta.mode() & 0o7777,
        options.uid_to_container(meta.uid()),
        options.gid_to_container(meta.gid()),
    ));

    match kind {
        "file" => {
            out.push_str(&format!(" size={} sha256digest={}", meta.len(), file_sha256(path)?));
        }
        "link" => {
            let target = fs::read_link(path)
                .map_err(|e| BaleError::io(format!("Failed to read link {}", path.display()), e))?;
            out.push_str(&format!(" link={}", escape(target.as_os_str().as_bytes())));
        }
        _ => {}
    }
    out.push('\n');

    if kind == "dir" {
        let mut children = fs::read_dir(path)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.file_name()))
                    .collect::<io::Result<Vec<_>>>()
            })
            .map_err(|e| {
                BaleError::io(format!("Failed to read directory {}", path.display()), e)
            })?;
        children.sort();

        for child in children {
            let child_name = format!("{}/{}", name, escape(child.as_bytes()));
            walk(&path.join(&child), &child_name, options, out)?;
        }
    }
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| BaleError::io(format!("Failed to open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| BaleError::io(format!("Failed to hash {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Octal-escape bytes that would break the line format.
fn escape(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        if b.is_ascii_graphic() && b != b'\\' && b != b'#' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{:03o}", b));
        }
    }
    out
}
