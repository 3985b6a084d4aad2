//! Runtime configuration (`config.json`) for an unpacked bundle.
//!
//! The process section is derived from the image configuration. Named
//! users and groups are resolved against the rootfs's own `/etc/passwd`
//! and `/etc/group`.

use std::fs;
use std::path::Path;

use bale_core::error::{BaleError, Result};
use serde_json::{json, Value};

use super::idmap::{IdMapping, MapOptions};
use super::ROOTFS_NAME;
use crate::oci::ImageRuntimeConfig;

/// Name of the runtime configuration file inside a bundle.
pub const CONFIG_NAME: &str = "config.json";

const OCI_RUNTIME_VERSION: &str = "1.0.2";
const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Build the runtime configuration document.
pub fn generate(
    image: &ImageRuntimeConfig,
    rootfs: &Path,
    options: &MapOptions,
) -> Result<Value> {
    let (uid, gid) = resolve_user(rootfs, image.user.as_deref().unwrap_or(""))?;

    let mut env = image.env_strings();
    if !image.env.iter().any(|(k, _)| k == "PATH") {
        env.insert(0, DEFAULT_PATH.to_string());
    }

    let mut namespaces = vec![
        json!({"type": "pid"}),
        json!({"type": "network"}),
        json!({"type": "ipc"}),
        json!({"type": "uts"}),
        json!({"type": "mount"}),
    ];
    let mut linux = json!({
        "maskedPaths": ["/proc/kcore", "/proc/latency_stats", "/proc/timer_list", "/sys/firmware"],
        "readonlyPaths": ["/proc/bus", "/proc/fs", "/proc/irq", "/proc/sys", "/proc/sysrq-trigger"],
    });
    if options.rootless {
        namespaces.push(json!({"type": "user"}));
        linux["uidMappings"] = mappings(&options.uid_mappings);
        linux["gidMappings"] = mappings(&options.gid_mappings);
    }
    linux["namespaces"] = Value::Array(namespaces);

    let annotations: serde_json::Map<String, Value> = image
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    Ok(json!({
        "ociVersion": OCI_RUNTIME_VERSION,
        "process": {
            "terminal": false,
            "user": {"uid": uid, "gid": gid},
            "args": image.args(),
            "env": env,
            "cwd": image.working_dir.as_deref().filter(|d| !d.is_empty()).unwrap_or("/"),
            "noNewPrivileges": true,
        },
        "root": {"path": ROOTFS_NAME, "readonly": false},
        "hostname": "bale",
        "mounts": default_mounts(options.rootless),
        "annotations": annotations,
        "linux": linux,
    }))
}

/// Write the runtime configuration into `bundle`.
pub fn write(bundle: &Path, config: &Value) -> Result<()> {
    let path = bundle.join(CONFIG_NAME);
    let data = serde_json::to_vec_pretty(config)?;
    fs::write(&path, data)
        .map_err(|e| BaleError::io(format!("Failed to write {}", path.display()), e))
}

fn mappings(mappings: &[IdMapping]) -> Value {
    mappings
        .iter()
        .map(|m| json!({"containerID": m.container_id, "hostID": m.host_id, "size": m.size}))
        .collect()
}

fn default_mounts(rootless: bool) -> Value {
    let mut devpts_options = vec!["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"];
    if !rootless {
        devpts_options.push("gid=5");
    }
    let sys = if rootless {
        json!({"destination": "/sys", "type": "none", "source": "/sys",
               "options": ["rbind", "nosuid", "noexec", "nodev", "ro"]})
    } else {
        json!({"destination": "/sys", "type": "sysfs", "source": "sysfs",
               "options": ["nosuid", "noexec", "nodev", "ro"]})
    };

    json!([
        {"destination": "/proc", "type": "proc", "source": "proc"},
        {"destination": "/dev", "type": "tmpfs", "source": "tmpfs",
         "options": ["nosuid", "strictatime", "mode=755", "size=65536k"]},
        {"destination": "/dev/pts", "type": "devpts", "source": "devpts",
         "options": devpts_options},
        {"destination": "/dev/shm", "type": "tmpfs", "source": "shm",
         "options": ["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"]},
        {"destination": "/dev/mqueue", "type": "mqueue", "source": "mqueue",
         "options": ["nosuid", "noexec", "nodev"]},
        sys,
    ])
}

/// Resolve an image `User` value (`user`, `user:group`, numeric or named)
/// to a uid/gid pair.
pub fn resolve_user(rootfs: &Path, user: &str) -> Result<(u32, u32)> {
    if user.is_empty() {
        return Ok((0, 0));
    }
    let (user_part, group_part) = match user.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (user, None),
    };

    let passwd = read_database(rootfs, "etc/passwd")?;
    let (uid, primary_gid) = match user_part.parse::<u32>() {
        Ok(uid) => {
            let gid = passwd
                .iter()
                .find(|fields| fields.get(2).and_then(|f| f.parse::<u32>().ok()) == Some(uid))
                .and_then(|fields| fields.get(3)?.parse::<u32>().ok())
                .unwrap_or(0);
            (uid, gid)
        }
        Err(_) => {
            let fields = passwd
                .iter()
                .find(|fields| fields.first().map(String::as_str) == Some(user_part))
                .ok_or_else(|| {
                    BaleError::InvalidArgument(format!("unknown user '{}' in image", user_part))
                })?;
            let id = |idx: usize| {
                fields.get(idx).and_then(|f| f.parse::<u32>().ok()).ok_or_else(|| {
                    BaleError::InvalidArgument(format!("malformed passwd entry for '{}'", user_part))
                })
            };
            (id(2)?, id(3)?)
        }
    };

    let gid = match group_part {
        None | Some("") => primary_gid,
        Some(group) => match group.parse::<u32>() {
            Ok(gid) => gid,
            Err(_) => read_database(rootfs, "etc/group")?
                .iter()
                .find(|fields| fields.first().map(String::as_str) == Some(group))
                .and_then(|fields| fields.get(2)?.parse::<u32>().ok())
                .ok_or_else(|| {
                    BaleError::InvalidArgument(format!("unknown group '{}' in image", group))
                })?,
        },
    };

    Ok((uid, gid))
}

/// Colon-separated records of a database file in the rootfs. A missing
/// file, or one resolving outside the rootfs, reads as empty.
fn read_database(rootfs: &Path, rel: &str) -> Result<Vec<Vec<String>>> {
    let (Ok(root), Ok(path)) = (rootfs.canonicalize(), rootfs.join(rel).canonicalize()) else {
        return Ok(Vec::new());
    };
    if !path.starts_with(&root) || !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| BaleError::io(format!("Failed to read {}", path.display()), e))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split(':').map(str::to_string).collect())
        .collect())
}
