use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::MonitorStrategy;
use crate::volume::Volume;

/// Stack size limit passed to the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StackLimit {
    /// Leave the engine default untouched.
    #[default]
    EngineDefault,
    Unlimited,
    Bytes(u64),
}

impl StackLimit {
    /// Value for `--ulimit stack=<v>:<v>`, `-1` meaning unlimited.
    pub fn ulimit_value(self) -> Option<i64> {
        match self {
            Self::EngineDefault => None,
            Self::Unlimited => Some(-1),
            Self::Bytes(bytes) => Some(i64::try_from(bytes).unwrap_or(i64::MAX)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPUs the container is pinned to. Empty means no pinning.
    pub cpuset: Vec<u32>,
    /// Memory limit in MiB; swap is capped to the same value.
    pub memory_mb: Option<u64>,
    pub stack: StackLimit,
    pub pids: Option<u32>,
}

/// Named volume mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn new(volume: &Volume, container_path: impl Into<String>) -> Self {
        Self {
            volume: volume.name().to_string(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Where the contained process reads stdin from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Input {
    #[default]
    Null,
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Where the contained process writes stdout to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Discard,
    File(PathBuf),
}

/// Everything needed to create and run one container.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub image: String,
    pub args: Vec<String>,
    pub limits: ResourceLimits,
    pub enable_network: bool,
    pub enable_logging_driver: bool,
    pub workdir: Option<String>,
    pub volumes: Vec<VolumeMount>,
    pub binds: Vec<BindMount>,
    /// Falls back to the runtime's configured parent when unset.
    pub cgroup_parent: Option<String>,
    pub stdin: Input,
    pub stdout: Output,
    /// No deadline when unset.
    pub timeout: Option<Duration>,
    /// Overrides the runtime's monitor strategy for this task.
    pub monitor: Option<MonitorStrategy>,
}

impl TaskSpec {
    pub fn new<I, S>(image: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub exit_code: i32,
    /// Wall time, clamped to the timeout when `tle` is set.
    pub time: Duration,
    /// Peak memory in bytes.
    pub memory: u64,
    pub tle: bool,
    /// Captured stderr, bounded by the runtime's stderr cap.
    pub stderr: Vec<u8>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        !self.tle && self.exit_code == 0
    }
}
