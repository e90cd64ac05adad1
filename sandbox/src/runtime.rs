use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::engine::{Container, ContainerEngine};
use crate::error::Result;
use crate::limited::LimitedBuffer;
use crate::monitor::{MonitorStrategy, ResourceMonitor, SAMPLE_INTERVAL};
use crate::spec::{TaskResult, TaskSpec};

/// Extra wall time granted past the timeout before the container is stopped.
pub const DEADLINE_GRACE: Duration = Duration::from_millis(500);
/// Exit code reported for a container stopped at its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Stderr kept per run.
pub const MAX_STDERR_BYTES: usize = 1 << 10;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub monitor: MonitorStrategy,
    /// Default cgroup parent for tasks that do not set one.
    pub cgroup_parent: Option<String>,
    pub sample_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorStrategy::default(),
            cgroup_parent: None,
            sample_interval: SAMPLE_INTERVAL,
        }
    }
}

/// Runs tasks to completion inside containers.
#[derive(Clone)]
pub struct SandboxRuntime {
    engine: Arc<dyn ContainerEngine>,
    config: RuntimeConfig,
}

impl SandboxRuntime {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: RuntimeConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Create, start, monitor and remove one container.
    ///
    /// The container is removed on every path, including when the run
    /// fails or panics.
    pub async fn run(&self, mut spec: TaskSpec) -> Result<TaskResult> {
        if spec.cgroup_parent.is_none() {
            spec.cgroup_parent = self.config.cgroup_parent.clone();
        }
        let container = self.engine.create_container(&spec).await?;
        debug!(container = %container.id, image = %spec.image, "container created");

        let outcome = AssertUnwindSafe(self.supervise(&container, &spec))
            .catch_unwind()
            .await;
        let removed = self.engine.remove_container(&container).await;

        match outcome {
            Err(panic) => {
                if let Err(e) = removed {
                    warn!(container = %container.id, error = %e, "failed to remove container");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(result) => {
                let result = result?;
                removed?;
                Ok(result)
            }
        }
    }

    async fn supervise(&self, container: &Container, spec: &TaskSpec) -> Result<TaskResult> {
        let strategy = spec.monitor.unwrap_or(self.config.monitor);
        let mut monitor =
            ResourceMonitor::new(strategy, Arc::clone(&self.engine), container.clone())
                .with_interval(self.config.sample_interval);
        let mut stderr = LimitedBuffer::new(MAX_STDERR_BYTES);

        monitor.start();
        let attached = self
            .engine
            .start_attached(container, &spec.stdin, &spec.stdout, &mut stderr);
        let finished = match spec.timeout {
            Some(timeout) => tokio::time::timeout(timeout + DEADLINE_GRACE, attached)
                .await
                .ok(),
            None => Some(attached.await),
        };
        monitor.stop().await;

        let Some(attached) = finished else {
            let timeout = spec.timeout.unwrap_or_default();
            warn!(
                container = %container.id,
                timeout_ms = timeout.as_millis() as u64,
                "deadline exceeded, stopping container"
            );
            self.engine.stop_container(container).await?;
            return Ok(TaskResult {
                exit_code: TIMEOUT_EXIT_CODE,
                time: timeout,
                memory: monitor.max_used_memory(),
                tle: true,
                stderr: stderr.into_bytes(),
            });
        };
        attached?;

        let mut time = monitor.used_time().await;
        let mut tle = false;
        if let Some(timeout) = spec.timeout
            && time > timeout
        {
            time = timeout;
            tle = true;
        }
        let exit_code = self.engine.exit_code(container).await?;

        debug!(
            container = %container.id,
            exit_code,
            time_ms = time.as_millis() as u64,
            memory = monitor.max_used_memory(),
            tle,
            "container finished"
        );
        Ok(TaskResult {
            exit_code,
            time,
            memory: monitor.max_used_memory(),
            tle,
            stderr: stderr.into_bytes(),
        })
    }
}
