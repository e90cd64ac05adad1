use std::path::PathBuf;

use serde::Deserialize;

/// Docker backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// `docker` binary name or path.
    pub binary: String,
    /// Root of the cgroup v2 hierarchy.
    pub cgroup_root: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        }
    }
}
