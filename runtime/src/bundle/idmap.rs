//! User and group ID mappings.

use std::fmt;
use std::str::FromStr;

use bale_core::error::{BaleError, Result};
use serde::{Deserialize, Serialize};

/// A contiguous range of container IDs mapped onto host IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl IdMapping {
    pub fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    fn host_for(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        (offset < self.size).then(|| self.host_id + offset)
    }

    fn container_for(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.host_id)?;
        (offset < self.size).then(|| self.container_id + offset)
    }
}

impl FromStr for IdMapping {
    type Err = BaleError;

    /// Parse `<container>:<host>:<size>`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let [container, host, size] = parts.as_slice() else {
            return Err(BaleError::InvalidArgument(format!(
                "invalid id mapping '{}': expected <container>:<host>:<size>",
                s
            )));
        };

        let field = |value: &str, what: &str| {
            value.parse::<u32>().map_err(|e| {
                BaleError::InvalidArgument(format!(
                    "invalid {} in id mapping '{}': {}",
                    what, s, e
                ))
            })
        };

        let mapping = Self::new(
            field(*container, "container id")?,
            field(*host, "host id")?,
            field(*size, "size")?,
        );
        if mapping.size == 0 {
            return Err(BaleError::InvalidArgument(format!(
                "invalid id mapping '{}': size must be non-zero",
                s
            )));
        }
        if mapping.container_id.checked_add(mapping.size - 1).is_none()
            || mapping.host_id.checked_add(mapping.size - 1).is_none()
        {
            return Err(BaleError::InvalidArgument(format!(
                "invalid id mapping '{}': range overflows",
                s
            )));
        }
        Ok(mapping)
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.container_id, self.host_id, self.size)
    }
}

/// Ownership options for unpacking.
///
/// An empty mapping list is the identity mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOptions {
    #[serde(default)]
    pub uid_mappings: Vec<IdMapping>,
    #[serde(default)]
    pub gid_mappings: Vec<IdMapping>,
    /// Skip applying ownership; files stay owned by the invoking user.
    #[serde(default)]
    pub rootless: bool,
}

impl MapOptions {
    /// Rootless options mapping container root onto the given host IDs.
    pub fn rootless(euid: u32, egid: u32) -> Self {
        Self {
            uid_mappings: vec![IdMapping::new(0, euid, 1)],
            gid_mappings: vec![IdMapping::new(0, egid, 1)],
            rootless: true,
        }
    }

    /// Parse mapping strings, as accepted on the command line.
    pub fn parse(uid_maps: &[String], gid_maps: &[String], rootless: bool) -> Result<Self> {
        Ok(Self {
            uid_mappings: uid_maps.iter().map(|m| m.parse()).collect::<Result<_>>()?,
            gid_mappings: gid_maps.iter().map(|m| m.parse()).collect::<Result<_>>()?,
            rootless,
        })
    }

    pub fn uid_to_host(&self, uid: u32) -> Result<u32> {
        to_host(&self.uid_mappings, uid, "uid")
    }

    pub fn gid_to_host(&self, gid: u32) -> Result<u32> {
        to_host(&self.gid_mappings, gid, "gid")
    }

    /// Host uid back to the container's view; unmapped IDs are returned as-is.
    pub fn uid_to_container(&self, uid: u32) -> u32 {
        to_container(&self.uid_mappings, uid)
    }

    pub fn gid_to_container(&self, gid: u32) -> u32 {
        to_container(&self.gid_mappings, gid)
    }
}

fn to_host(mappings: &[IdMapping], id: u32, what: &str) -> Result<u32> {
    if mappings.is_empty() {
        return Ok(id);
    }
    mappings
        .iter()
        .find_map(|m| m.host_for(id))
        .ok_or_else(|| BaleError::InvalidArgument(format!("{} {} is not mapped", what, id)))
}

fn to_container(mappings: &[IdMapping], id: u32) -> u32 {
    mappings
        .iter()
        .find_map(|m| m.container_for(id))
        .unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_core::ErrorKind;

    #[test]
    fn test_parse_mapping() {
        let m: IdMapping = "0:1000:65536".parse().unwrap();
        assert_eq!(m, IdMapping::new(0, 1000, 65536));
        assert_eq!(m.to_string(), "0:1000:65536");
    }

    #[test]
    fn test_parse_mapping_rejects_garbage() {
        for bad in ["", "0:1", "0:1:2:3", "a:1:1", "0:1:0", "0:-1:1", "4294967295:0:2"] {
            let err = bad.parse::<IdMapping>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", bad);
        }
    }

    #[test]
    fn test_identity_without_mappings() {
        let options = MapOptions::default();
        assert_eq!(options.uid_to_host(42).unwrap(), 42);
        assert_eq!(options.gid_to_container(7), 7);
    }

    #[test]
    fn test_range_mapping() {
        let options = MapOptions::parse(
            &["0:100000:1000".to_string()],
            &["0:200000:10".to_string(), "10:300000:10".to_string()],
            false,
        )
        .unwrap();

        assert_eq!(options.uid_to_host(0).unwrap(), 100000);
        assert_eq!(options.uid_to_host(999).unwrap(), 100999);
        assert!(options.uid_to_host(1000).is_err());
        assert_eq!(options.gid_to_host(15).unwrap(), 300005);
        assert_eq!(options.uid_to_container(100005), 5);
        assert_eq!(options.uid_to_container(5), 5);
    }

    #[test]
    fn test_rootless_defaults() {
        let options = MapOptions::rootless(1000, 1001);
        assert!(options.rootless);
        assert_eq!(options.uid_to_host(0).unwrap(), 1000);
        assert_eq!(options.gid_to_host(0).unwrap(), 1001);
        assert!(options.uid_to_host(1).is_err());
    }

    #[test]
    fn test_serde_shape() {
        let options = MapOptions::rootless(1000, 1000);
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["uid_mappings"][0]["host_id"], 1000);
        assert_eq!(json["rootless"], true);
    }
}
