//! Container sandbox: runs untrusted programs inside an engine-managed
//! container with CPU, memory and process limits, and measures them.

mod engine;
mod error;
mod limited;
mod monitor;
mod runtime;
mod spec;
mod volume;

#[cfg(test)]
mod fake;

pub use engine::{Container, ContainerEngine, ContainerTimes};
pub use error::{Result, SandboxError};
pub use limited::{LimitedBuffer, STRIPPED_MARKER};
pub use monitor::{MonitorStrategy, ResourceMonitor, SAMPLE_INTERVAL};
pub use runtime::{
    DEADLINE_GRACE, MAX_STDERR_BYTES, RuntimeConfig, SandboxRuntime, TIMEOUT_EXIT_CODE,
};
pub use spec::{
    BindMount, Input, Output, ResourceLimits, StackLimit, TaskResult, TaskSpec, VolumeMount,
};
pub use volume::{HELPER_IMAGE, HELPER_MOUNT, Volume, VolumeManager};
