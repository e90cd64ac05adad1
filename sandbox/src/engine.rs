use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::limited::LimitedBuffer;
use crate::spec::{Input, Output, TaskSpec};

/// A created container, addressed by engine id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    pub id: String,
    /// Cgroup parent the container was created under, if any.
    pub cgroup_parent: Option<String>,
}

/// Engine-reported start and finish times of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerTimes {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ContainerTimes {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Container engine operations the runtime is built on.
///
/// Implementations shell out to an engine CLI or talk to its API. All
/// methods take `&self`; one engine is shared by every worker.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine name for logging.
    fn name(&self) -> &str;

    /// Create (but do not start) a container for `spec`.
    async fn create_container(&self, spec: &TaskSpec) -> Result<Container>;

    /// Start the container attached to the given streams and wait for it to
    /// exit. Stderr is written into `stderr`.
    async fn start_attached(
        &self,
        container: &Container,
        stdin: &Input,
        stdout: &Output,
        stderr: &mut LimitedBuffer,
    ) -> Result<()>;

    /// Force-stop a running container. Succeeds if it already exited.
    async fn stop_container(&self, container: &Container) -> Result<()>;

    async fn remove_container(&self, container: &Container) -> Result<()>;

    async fn exit_code(&self, container: &Container) -> Result<i32>;

    async fn times(&self, container: &Container) -> Result<ContainerTimes>;

    /// Copy a host file to `dst` inside a (possibly stopped) container.
    async fn copy_into(&self, container: &Container, src: &Path, dst: &str) -> Result<()>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Pids currently in the container's cgroup.
    async fn cgroup_procs(&self, container: &Container) -> Result<Vec<u32>>;

    /// Current memory usage of the container's cgroup in bytes.
    async fn memory_current(&self, container: &Container) -> Result<u64>;
}
