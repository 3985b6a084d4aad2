//! Layer application.
//!
//! Layers are tar archives, optionally gzip-compressed, applied in order on
//! top of a rootfs directory. Whiteout entries remove content from lower
//! layers:
//!
//! - `.wh.<name>` removes `<name>` from the same directory
//! - `.wh..wh..opq` hides every lower-layer entry of its directory

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use bale_core::error::{BaleError, Result};
use flate2::read::GzDecoder;
use tar::{Archive, Entry, EntryType};

use super::idmap::MapOptions;
use crate::oci::{media_types, Descriptor};

pub const WHITEOUT_PREFIX: &str = ".wh.";
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Layer compression, derived from the media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    pub fn for_media_type(media_type: &str) -> Result<Self> {
        match media_type {
            media_types::IMAGE_LAYER | media_types::IMAGE_LAYER_NONDISTRIBUTABLE => {
                Ok(Self::None)
            }
            media_types::IMAGE_LAYER_GZIP
            | media_types::IMAGE_LAYER_NONDISTRIBUTABLE_GZIP
            | media_types::DOCKER_LAYER_GZIP => Ok(Self::Gzip),
            other => Err(BaleError::UnsupportedSchema {
                media_type: other.to_string(),
            }),
        }
    }
}

/// Apply one layer read from `reader` onto `rootfs`.
///
/// The reader is drained to the end so that a verifying reader gets to
/// check the digest; a mismatch surfaces as `CorruptBlob`.
pub fn apply_layer<R: Read>(
    mut reader: R,
    descriptor: &Descriptor,
    rootfs: &Path,
    options: &MapOptions,
) -> Result<()> {
    let compression = Compression::for_media_type(&descriptor.media_type)?;
    let mut unpacker = LayerUnpacker::new(&descriptor.digest, rootfs, options)?;

    match compression {
        Compression::None => unpacker.unpack(&mut reader)?,
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(&mut reader);
            unpacker.unpack(&mut decoder)?;
            drain(&mut decoder).map_err(|e| unpacker.io_error("drain layer", e))?;
        }
    }
    drain(&mut reader).map_err(|e| unpacker.io_error("drain layer", e))?;

    tracing::debug!(
        layer = %descriptor.digest,
        target = %rootfs.display(),
        entries = unpacker.seen.len(),
        "Applied OCI layer"
    );
    Ok(())
}

fn drain<R: Read>(reader: &mut R) -> io::Result<()> {
    io::copy(reader, &mut io::sink()).map(|_| ())
}

/// Relative form of an archive path, or `None` if it escapes the root.
fn clean_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

struct LayerUnpacker<'a> {
    digest: &'a str,
    rootfs: PathBuf,
    options: &'a MapOptions,
    /// Paths (and their ancestors) written by this layer
    seen: HashSet<PathBuf>,
}

impl<'a> LayerUnpacker<'a> {
    fn new(digest: &'a str, rootfs: &Path, options: &'a MapOptions) -> Result<Self> {
        let rootfs = rootfs.canonicalize().map_err(|e| {
            BaleError::io(format!("Failed to resolve rootfs {}", rootfs.display()), e)
        })?;
        Ok(Self {
            digest,
            rootfs,
            options,
            seen: HashSet::new(),
        })
    }

    fn io_error(&self, context: &str, e: io::Error) -> BaleError {
        if e.kind() == io::ErrorKind::InvalidData {
            BaleError::CorruptBlob {
                digest: self.digest.to_string(),
                reason: format!("{}: {}", context, e),
            }
        } else {
            BaleError::io(format!("Failed to {} {}", context, self.digest), e)
        }
    }

    fn unpack<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut archive = Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| self.io_error("read layer", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| self.io_error("read layer entry", e))?;
            let raw = entry
                .path()
                .map_err(|e| self.io_error("read entry path", e))?
                .into_owned();

            let Some(rel) = clean_path(&raw) else {
                tracing::warn!(path = %raw.display(), "Skipping layer entry outside rootfs");
                continue;
            };
            let Some(name) = rel.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let parent = rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

            if name == OPAQUE_WHITEOUT {
                self.opaque(&parent)?;
                continue;
            }
            if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                self.whiteout(&parent.join(hidden))?;
                continue;
            }

            self.replace_existing(&rel, entry.header().entry_type())?;

            entry.set_preserve_permissions(true);
            entry.set_preserve_mtime(true);
            let unpacked = entry
                .unpack_in(&self.rootfs)
                .map_err(|e| self.io_error(&format!("unpack {}", rel.display()), e))?;
            if !unpacked {
                tracing::warn!(path = %raw.display(), "Skipping layer entry outside rootfs");
                continue;
            }

            self.apply_ownership(&rel, &entry)?;
            self.mark_seen(&rel);
        }
        Ok(())
    }

    fn mark_seen(&mut self, rel: &Path) {
        for ancestor in rel.ancestors() {
            if ancestor.as_os_str().is_empty() || !self.seen.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }

    /// Absolute path of `rel`, provided its parent resolves inside the rootfs.
    fn resolve(&self, rel: &Path) -> Result<Option<PathBuf>> {
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        let parent = match self.rootfs.join(parent).canonicalize() {
            Ok(parent) => parent,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BaleError::io(
                    format!("Failed to resolve {}", rel.display()),
                    e,
                ))
            }
        };
        if !parent.starts_with(&self.rootfs) {
            tracing::warn!(path = %rel.display(), "Layer path resolves outside rootfs");
            return Ok(None);
        }
        Ok(rel.file_name().map(|name| parent.join(name)))
    }

    fn whiteout(&self, rel: &Path) -> Result<()> {
        if let Some(path) = self.resolve(rel)? {
            tracing::trace!(path = %rel.display(), "Whiteout");
            remove_path(&path)?;
        }
        Ok(())
    }

    fn opaque(&self, rel_dir: &Path) -> Result<()> {
        let dir = if rel_dir.as_os_str().is_empty() {
            Some(self.rootfs.clone())
        } else {
            self.resolve(rel_dir)?
        };
        match dir {
            Some(dir) if dir.is_dir() => self.prune_lower(&dir, rel_dir),
            _ => Ok(()),
        }
    }

    /// Remove everything under `dir` that this layer did not write.
    fn prune_lower(&self, dir: &Path, rel_dir: &Path) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| {
            BaleError::io(format!("Failed to read directory {}", dir.display()), e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BaleError::io(format!("Failed to read directory {}", dir.display()), e)
            })?;
            let child_rel = rel_dir.join(entry.file_name());
            let child = entry.path();

            if !self.seen.contains(&child_rel) {
                remove_path(&child)?;
            } else if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.prune_lower(&child, &child_rel)?;
            }
        }
        Ok(())
    }

    /// Clear whatever a lower layer left at `rel`, unless both are directories.
    fn replace_existing(&self, rel: &Path, entry_type: EntryType) -> Result<()> {
        let Some(path) = self.resolve(rel)? else {
            return Ok(());
        };
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() && entry_type == EntryType::Directory => Ok(()),
            Ok(_) => remove_path(&path),
            Err(_) => Ok(()),
        }
    }

    fn apply_ownership<R: Read>(&self, rel: &Path, entry: &Entry<'_, R>) -> Result<()> {
        if self.options.rootless {
            return Ok(());
        }

        let header = entry.header();
        let id = |value: io::Result<u64>, what: &str| -> Result<u32> {
            let value = value.map_err(|e| self.io_error(&format!("read {}", what), e))?;
            u32::try_from(value).map_err(|_| {
                BaleError::InvalidArgument(format!(
                    "{} {} of {} out of range",
                    what,
                    value,
                    rel.display()
                ))
            })
        };
        let uid = self.options.uid_to_host(id(header.uid(), "uid")?)?;
        let gid = self.options.gid_to_host(id(header.gid(), "gid")?)?;

        let path = self.rootfs.join(rel);
        std::os::unix::fs::lchown(&path, Some(uid), Some(gid)).map_err(|e| {
            BaleError::io(format!("Failed to chown {}", path.display()), e)
        })?;

        // chown clears setuid/setgid bits.
        let entry_type = header.entry_type();
        if entry_type != EntryType::Symlink && entry_type != EntryType::Link {
            if let Ok(mode) = header.mode() {
                fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777)).map_err(
                    |e| BaleError::io(format!("Failed to chmod {}", path.display()), e),
                )?;
            }
        }
        Ok(())
    }
}

fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BaleError::io(
            format!("Failed to remove {}", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_core::ErrorKind;
    use flate2::write::GzEncoder;
    use flate2::Compression as GzLevel;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    enum Item<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
    }

    fn tar_bytes(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for item in items {
            let mut header = Header::new_gnu();
            match item {
                Item::File(name, content) => {
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, *content).unwrap();
                }
                Item::Dir(name) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
                Item::Symlink(name, target) => {
                    header.set_entry_type(EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_link_name(target).unwrap();
                    header.set_cksum();
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn layer(media_type: &str, data: &[u8]) -> Descriptor {
        Descriptor::for_bytes(media_type, data)
    }

    fn rootless() -> MapOptions {
        MapOptions {
            rootless: true,
            ..MapOptions::default()
        }
    }

    fn apply(rootfs: &Path, items: &[Item<'_>]) {
        let data = tar_bytes(items);
        let desc = layer(media_types::IMAGE_LAYER, &data);
        apply_layer(data.as_slice(), &desc, rootfs, &rootless()).unwrap();
    }

    #[test]
    fn test_apply_gzip_layer() {
        let temp = TempDir::new().unwrap();
        let data = gzip(&tar_bytes(&[
            Item::File("file1.txt", b"content1"),
            Item::File("dir/file2.txt", b"content2"),
        ]));
        let desc = layer(media_types::IMAGE_LAYER_GZIP, &data);

        apply_layer(data.as_slice(), &desc, temp.path(), &rootless()).unwrap();

        assert_eq!(fs::read_to_string(temp.path().join("file1.txt")).unwrap(), "content1");
        assert_eq!(
            fs::read_to_string(temp.path().join("dir/file2.txt")).unwrap(),
            "content2"
        );
    }

    #[test]
    fn test_upper_layer_overwrites() {
        let temp = TempDir::new().unwrap();
        apply(temp.path(), &[Item::File("file.txt", b"version 1")]);
        apply(temp.path(), &[Item::File("file.txt", b"version 2")]);

        assert_eq!(fs::read_to_string(temp.path().join("file.txt")).unwrap(), "version 2");
    }

    #[test]
    fn test_file_replaces_directory() {
        let temp = TempDir::new().unwrap();
        apply(temp.path(), &[Item::Dir("thing"), Item::File("thing/inner", b"x")]);
        apply(temp.path(), &[Item::File("thing", b"now a file")]);

        assert!(temp.path().join("thing").is_file());
    }

    #[test]
    fn test_whiteout_removes_file_and_directory() {
        let temp = TempDir::new().unwrap();
        apply(
            temp.path(),
            &[
                Item::File("etc/motd", b"hello"),
                Item::File("etc/keep", b"keep"),
                Item::File("var/cache/a", b"a"),
            ],
        );
        apply(
            temp.path(),
            &[
                Item::File("etc/.wh.motd", b""),
                Item::File(".wh.var", b""),
                Item::File(".wh.missing", b""),
            ],
        );

        assert!(!temp.path().join("etc/motd").exists());
        assert!(temp.path().join("etc/keep").exists());
        assert!(!temp.path().join("var").exists());
        assert!(!temp.path().join(".wh.missing").exists());
    }

    #[test]
    fn test_opaque_directory_hides_lower_entries() {
        let temp = TempDir::new().unwrap();
        apply(
            temp.path(),
            &[
                Item::File("app/old.txt", b"old"),
                Item::File("app/sub/old.txt", b"old"),
                Item::File("other.txt", b"other"),
            ],
        );
        apply(
            temp.path(),
            &[
                Item::File("app/sub/new.txt", b"new"),
                Item::File("app/.wh..wh..opq", b""),
                Item::File("app/late.txt", b"late"),
            ],
        );

        assert!(!temp.path().join("app/old.txt").exists());
        assert!(!temp.path().join("app/sub/old.txt").exists());
        assert!(temp.path().join("app/sub/new.txt").exists());
        assert!(temp.path().join("app/late.txt").exists());
        assert!(temp.path().join("other.txt").exists());
        assert!(!temp.path().join("app/.wh..wh..opq").exists());
    }

    #[test]
    fn test_whiteout_does_not_follow_symlink_out_of_rootfs() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("victim"), b"precious").unwrap();
        let temp = TempDir::new().unwrap();
        let target = outside.path().to_str().unwrap();

        apply(temp.path(), &[Item::Symlink("escape", target)]);
        apply(temp.path(), &[Item::File("escape/.wh.victim", b"")]);

        assert!(outside.path().join("victim").exists());
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(clean_path(Path::new("/etc/passwd")), Some(PathBuf::from("etc/passwd")));
        assert_eq!(clean_path(Path::new("a/../../b")), None);
    }

    #[test]
    fn test_unsupported_compression() {
        let temp = TempDir::new().unwrap();
        let desc = layer(media_types::IMAGE_LAYER_ZSTD, b"zstd");

        let err = apply_layer(&b"zstd"[..], &desc, temp.path(), &rootless()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSchema);
    }

    #[test]
    fn test_trailing_read_error_is_corrupt_blob() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::InvalidData, "digest mismatch"))
            }
        }

        let temp = TempDir::new().unwrap();
        let data = tar_bytes(&[Item::File("a", b"a")]);
        let desc = layer(media_types::IMAGE_LAYER, &data);

        let err = apply_layer(data.as_slice().chain(Failing), &desc, temp.path(), &rootless())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptBlob);
    }

    #[test]
    fn test_unmapped_owner_is_rejected() {
        let temp = TempDir::new().unwrap();
        let data = {
            let mut builder = Builder::new(Vec::new());
            let mut header = Header::new_gnu();
            header.set_size(1);
            header.set_mode(0o644);
            header.set_uid(5);
            header.set_gid(5);
            header.set_cksum();
            builder.append_data(&mut header, "owned", &b"x"[..]).unwrap();
            builder.into_inner().unwrap()
        };
        let desc = layer(media_types::IMAGE_LAYER, &data);
        let options = MapOptions {
            uid_mappings: vec![super::super::idmap::IdMapping::new(0, 1000, 1)],
            gid_mappings: vec![],
            rootless: false,
        };

        let err = apply_layer(data.as_slice(), &desc, temp.path(), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_ownership_applied_through_mapping() {
        let euid = unsafe { libc::geteuid() };
        let egid = unsafe { libc::getegid() };
        let temp = TempDir::new().unwrap();
        let data = {
            let mut builder = Builder::new(Vec::new());
            let mut header = Header::new_gnu();
            header.set_size(1);
            header.set_mode(0o640);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder.append_data(&mut header, "owned", &b"x"[..]).unwrap();
            builder.into_inner().unwrap()
        };
        let desc = layer(media_types::IMAGE_LAYER, &data);
        let options = MapOptions {
            rootless: false,
            ..MapOptions::rootless(euid, egid)
        };

        apply_layer(data.as_slice(), &desc, temp.path(), &options).unwrap();

        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(temp.path().join("owned")).unwrap();
        assert_eq!(meta.uid(), euid);
        assert_eq!(meta.gid(), egid);
        assert_eq!(meta.mode() & 0o777, 0o640);
    }
}
