use std::path::Path;

use sandbox::SandboxError;

use crate::command::exec;
use crate::config::DockerConfig;

/// Verify that the docker CLI exists and its daemon answers.
///
/// Collects all failures and returns them in a single
/// `EngineNotAvailable` error.
pub async fn check_prerequisites(config: &DockerConfig) -> Result<(), SandboxError> {
    let mut errors = Vec::new();

    if which::which(&config.binary).is_err() {
        errors.push(format!("docker binary not found: {}", config.binary));
    } else if let Err(e) =
        exec(&config.binary, &["version", "--format", "{{.Server.Version}}"]).await
    {
        errors.push(format!("docker daemon not reachable: {}", e.detail));
    }
    if !config.cgroup_root.is_dir() {
        errors.push(format!(
            "cgroup root not found: {}",
            config.cgroup_root.display()
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SandboxError::EngineNotAvailable(errors.join("; ")))
    }
}

/// Whether `root` is a unified (v2) cgroup hierarchy.
///
/// High-precision monitoring reads `cgroup.procs` and `memory.current`,
/// which only exist under cgroup v2.
pub fn cgroup_v2_available(root: &Path) -> bool {
    root.join("cgroup.controllers").is_file()
}
