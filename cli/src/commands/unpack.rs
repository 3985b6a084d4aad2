//! `bale unpack` command: unpack a tagged image into a runtime bundle.

use std::path::PathBuf;

use bale_core::{BaleConfig, BaleError};
use bale_runtime::{unpack, MapOptions};
use clap::Args;

use crate::resolve::parse_image;

#[derive(Args)]
pub struct UnpackArgs {
    /// Image to unpack, as <path>[:<tag>] (tag defaults to "latest")
    #[arg(long)]
    pub image: String,

    /// UID mapping <container>:<host>:<size> (repeatable)
    #[arg(long = "uid-map")]
    pub uid_map: Vec<String>,

    /// GID mapping <container>:<host>:<size> (repeatable)
    #[arg(long = "gid-map")]
    pub gid_map: Vec<String>,

    /// Unpack without changing file ownership
    #[arg(long)]
    pub rootless: bool,

    /// Destination bundle directory
    pub bundle: PathBuf,
}

pub async fn execute(
    args: UnpackArgs,
    config: &BaleConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.bundle.as_os_str().is_empty() {
        return Err(BaleError::InvalidArgument("bundle path cannot be empty".to_string()).into());
    }
    let image = parse_image(&args.image)?;
    let options = map_options(&args, config, effective_ids())?;

    tracing::info!(
        uid_map = ?options.uid_mappings,
        gid_map = ?options.gid_mappings,
        rootless = options.rootless,
        "Parsed mappings"
    );

    let engine = super::open_layout(&image.layout)?;
    let meta = unpack(&engine, &image.tag, &args.bundle, &options).await?;

    println!(
        "Unpacked {}:{} ({}) into {}",
        image.layout.display(),
        image.tag,
        meta.from.digest,
        args.bundle.display()
    );
    Ok(())
}

fn effective_ids() -> (u32, u32) {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

/// Flags override the config file; rootless without maps maps container
/// root onto the invoking user.
fn map_options(
    args: &UnpackArgs,
    config: &BaleConfig,
    (euid, egid): (u32, u32),
) -> Result<MapOptions, BaleError> {
    let rootless = args.rootless || config.unpack.rootless;
    let uid_map = if args.uid_map.is_empty() {
        &config.unpack.uid_map
    } else {
        &args.uid_map
    };
    let gid_map = if args.gid_map.is_empty() {
        &config.unpack.gid_map
    } else {
        &args.gid_map
    };

    let mut options = MapOptions::parse(uid_map, gid_map, rootless)?;
    if rootless {
        let defaults = MapOptions::rootless(euid, egid);
        if options.uid_mappings.is_empty() {
            options.uid_mappings = defaults.uid_mappings;
        }
        if options.gid_mappings.is_empty() {
            options.gid_mappings = defaults.gid_mappings;
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_runtime::IdMapping;

    fn args(rootless: bool, uid_map: &[&str]) -> UnpackArgs {
        UnpackArgs {
            image: "img".to_string(),
            uid_map: uid_map.iter().map(|s| s.to_string()).collect(),
            gid_map: vec![],
            rootless,
            bundle: PathBuf::from("bundle"),
        }
    }

    #[test]
    fn test_rootless_defaults_to_effective_ids() {
        let options = map_options(&args(true, &[]), &BaleConfig::default(), (1000, 100)).unwrap();
        assert!(options.rootless);
        assert_eq!(options.uid_mappings, vec![IdMapping::new(0, 1000, 1)]);
        assert_eq!(options.gid_mappings, vec![IdMapping::new(0, 100, 1)]);
    }

    #[test]
    fn test_explicit_map_kept_when_rootless() {
        let options =
            map_options(&args(true, &["0:5000:10"]), &BaleConfig::default(), (1000, 100)).unwrap();
        assert_eq!(options.uid_mappings, vec![IdMapping::new(0, 5000, 10)]);
        assert_eq!(options.gid_mappings, vec![IdMapping::new(0, 100, 1)]);
    }

    #[test]
    fn test_config_supplies_maps() {
        let mut config = BaleConfig::default();
        config.unpack.gid_map = vec!["0:200:1".to_string()];
        let options = map_options(&args(false, &[]), &config, (1000, 100)).unwrap();
        assert!(!options.rootless);
        assert!(options.uid_mappings.is_empty());
        assert_eq!(options.gid_mappings, vec![IdMapping::new(0, 200, 1)]);
    }

    #[test]
    fn test_invalid_map_rejected() {
        assert!(map_options(&args(false, &["nope"]), &BaleConfig::default(), (0, 0)).is_err());
    }
}
