//! Image configuration parsing.
//!
//! Extracts the process-related settings of an image configuration blob
//! (entrypoint, command, environment, working directory, user, labels).

use std::collections::HashMap;

use bale_core::error::{BaleError, Result};
use oci_spec::image::ImageConfiguration;

/// Process settings taken from an image configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRuntimeConfig {
    /// Entrypoint command
    pub entrypoint: Option<Vec<String>>,

    /// Default command arguments
    pub cmd: Option<Vec<String>>,

    /// Environment variables, in image order
    pub env: Vec<(String, String)>,

    /// Working directory
    pub working_dir: Option<String>,

    /// User to run as (`name`, `uid`, `uid:gid`, ...)
    pub user: Option<String>,

    /// Exposed ports
    pub exposed_ports: Vec<String>,

    /// Labels
    pub labels: HashMap<String, String>,
}

impl ImageRuntimeConfig {
    /// Parse a raw image configuration blob.
    pub fn from_bytes(digest: &str, data: &[u8]) -> Result<Self> {
        let oci_config: ImageConfiguration =
            serde_json::from_slice(data).map_err(|e| BaleError::CorruptBlob {
                digest: digest.to_string(),
                reason: format!("Failed to parse image configuration: {}", e),
            })?;

        Ok(Self::from_oci_config(&oci_config))
    }

    /// Create from an oci-spec `ImageConfiguration`.
    pub fn from_oci_config(oci_config: &ImageConfiguration) -> Self {
        let config = oci_config.config();

        let entrypoint = config.as_ref().and_then(|c| c.entrypoint().clone());
        let cmd = config.as_ref().and_then(|c| c.cmd().clone());
        let working_dir = config.as_ref().and_then(|c| c.working_dir().clone());
        let user = config.as_ref().and_then(|c| c.user().clone());

        let env = config
            .as_ref()
            .and_then(|c| c.env().as_ref())
            .map(|env_list| {
                env_list
                    .iter()
                    .filter_map(|e| {
                        e.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let exposed_ports = config
            .as_ref()
            .and_then(|c| c.exposed_ports().as_ref())
            .map(|ports| ports.iter().cloned().collect())
            .unwrap_or_default();

        let labels = config
            .as_ref()
            .and_then(|c| c.labels().clone())
            .unwrap_or_default();

        Self {
            entrypoint,
            cmd,
            env,
            working_dir,
            user,
            exposed_ports,
            labels,
        }
    }

    /// Process arguments: entrypoint followed by cmd.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.entrypoint.clone().unwrap_or_default();
        args.extend(self.cmd.clone().unwrap_or_default());
        if args.is_empty() {
            args.push("sh".to_string());
        }
        args
    }

    /// Environment in `KEY=VALUE` form.
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_core::ErrorKind;

    const CONFIG: &str = r#"{
        "architecture": "amd64",
        "os": "linux",
        "config": {
            "Entrypoint": ["/bin/server"],
            "Cmd": ["--listen", "0.0.0.0:8080"],
            "Env": ["PATH=/usr/local/bin:/usr/bin:/bin", "EMPTY=", "BROKEN"],
            "WorkingDir": "/srv",
            "User": "1000:1000",
            "Labels": {"org.example.role": "web"}
        },
        "rootfs": {"type": "layers", "diff_ids": ["sha256:layer1hash"]},
        "history": []
    }"#;

    #[test]
    fn test_from_bytes() {
        let config = ImageRuntimeConfig::from_bytes("sha256:c", CONFIG.as_bytes()).unwrap();

        assert_eq!(config.entrypoint, Some(vec!["/bin/server".to_string()]));
        assert_eq!(
            config.args(),
            vec!["/bin/server", "--listen", "0.0.0.0:8080"]
        );
        assert_eq!(config.working_dir.as_deref(), Some("/srv"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(config.labels.get("org.example.role").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_env_parsing_skips_entries_without_equals() {
        let config = ImageRuntimeConfig::from_bytes("sha256:c", CONFIG.as_bytes()).unwrap();

        assert_eq!(config.env.len(), 2);
        assert_eq!(config.env[1], ("EMPTY".to_string(), String::new()));
        assert_eq!(
            config.env_strings()[0],
            "PATH=/usr/local/bin:/usr/bin:/bin"
        );
    }

    #[test]
    fn test_args_default_to_shell() {
        let config = ImageRuntimeConfig::default();
        assert_eq!(config.args(), vec!["sh"]);
    }

    #[test]
    fn test_from_bytes_invalid() {
        let err = ImageRuntimeConfig::from_bytes("sha256:c", b"not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptBlob);
    }
}
