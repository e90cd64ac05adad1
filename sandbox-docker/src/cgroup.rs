use std::path::{Path, PathBuf};

use sandbox::{Result, SandboxError};

/// Parent used by docker when the container sets none.
pub const DEFAULT_CGROUP_PARENT: &str = "system.slice";

/// Candidate cgroup v2 directories of a container.
///
/// The first is the layout under the systemd cgroup driver, the second
/// under the cgroupfs driver.
pub fn cgroup_dirs(root: &Path, container_id: &str, cgroup_parent: Option<&str>) -> [PathBuf; 2] {
    let parent = root.join(cgroup_parent.unwrap_or(DEFAULT_CGROUP_PARENT));
    [
        parent
            .join(format!("docker-{container_id}.scope"))
            .join("container"),
        parent.join(container_id),
    ]
}

/// Read `file` from the first candidate directory that has it.
pub(crate) async fn read_first(dirs: &[PathBuf], file: &str) -> Result<String> {
    for dir in dirs {
        if let Ok(content) = tokio::fs::read_to_string(dir.join(file)).await {
            return Ok(content);
        }
    }
    Err(SandboxError::Cgroup(format!("{file} not found in any cgroup directory")))
}

pub(crate) fn parse_procs(content: &str) -> Vec<u32> {
    content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

pub(crate) fn parse_memory(content: &str) -> Result<u64> {
    content
        .trim()
        .parse()
        .map_err(|e| SandboxError::Cgroup(format!("invalid memory.current {content:?}: {e}")))
}
