use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{MonitorStrategy, StackLimit};
use sandbox_docker::DockerConfig;
use serde::Deserialize;

use crate::error::{JudgeError, JudgeResult};
use crate::toolchain::SandboxLimits;
use crate::worker::WorkerSettings;

pub(crate) const DEFAULT_LEASE_SECS: u64 = 60;
pub(crate) const DEFAULT_TOUCH_INTERVAL_SECS: u64 = 20;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_MEMORY_MB: u64 = 1024;
pub(crate) const DEFAULT_PIDS_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct JudgeConfig {
    /// Worker name; a random one is generated when unset.
    pub name: Option<String>,
    pub base_dir: PathBuf,
    /// Language registry YAML.
    pub langs: PathBuf,
    /// Root of unpacked problem versions.
    pub problems_dir: PathBuf,
    /// Defaults to `<base_dir>/results`.
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Defaults to `<base_dir>/queue`.
    pub dir: Option<PathBuf>,
    pub lease_secs: u64,
    pub touch_interval_secs: u64,
    /// `null` disables the attempt cap.
    pub max_attempts: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: None,
            lease_secs: DEFAULT_LEASE_SECS,
            touch_interval_secs: DEFAULT_TOUCH_INTERVAL_SECS,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub monitor: MonitorStrategy,
    /// Cgroup parent of every container; docker's default when unset.
    pub cgroup_parent: Option<String>,
    pub helper_image: String,
    pub docker: DockerConfig,
    /// CPUs programs are pinned to; unpinned when empty.
    pub cpuset: Vec<u32>,
    pub memory_mb: u64,
    pub pids_limit: u32,
    /// Stack limit; unlimited when unset.
    pub stack_limit_mb: Option<u64>,
    pub compile_timeout_secs: u64,
    pub checker_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorStrategy::default(),
            cgroup_parent: None,
            helper_image: sandbox::HELPER_IMAGE.to_string(),
            docker: DockerConfig::default(),
            cpuset: Vec::new(),
            memory_mb: DEFAULT_MEMORY_MB,
            pids_limit: DEFAULT_PIDS_LIMIT,
            stack_limit_mb: None,
            compile_timeout_secs: 30,
            checker_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Workers polling in parallel within this process.
    pub concurrency: usize,
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval_secs: 3,
        }
    }
}

/// Load and validate a judge config from a YAML file.
///
/// Relative paths in the config are resolved against the config file's parent directory.
pub async fn load(path: &Path) -> JudgeResult<JudgeConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| JudgeError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: JudgeConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| JudgeError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    config.validate().await?;
    Ok(config)
}

async fn check_path_exists(path: &Path, label: &str) -> JudgeResult<()> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| JudgeError::Config(format!("check {label}: {e}")))?;
    if !exists {
        return Err(JudgeError::Config(format!(
            "{label} not found: {}",
            path.display()
        )));
    }
    Ok(())
}

impl JudgeConfig {
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = config_dir.join(&*p);
            }
        };
        resolve(&mut self.base_dir);
        resolve(&mut self.langs);
        resolve(&mut self.problems_dir);
        if let Some(dir) = &mut self.store_dir {
            resolve(dir);
        }
        if let Some(dir) = &mut self.queue.dir {
            resolve(dir);
        }
    }

    async fn validate(&self) -> JudgeResult<()> {
        check_path_exists(&self.langs, "language registry").await?;
        check_path_exists(&self.problems_dir, "problems_dir").await?;
        if self.queue.lease_secs == 0 {
            return Err(JudgeError::Config("queue.lease_secs must be positive".into()));
        }
        if self.queue.touch_interval_secs >= self.queue.lease_secs {
            return Err(JudgeError::Config(format!(
                "queue.touch_interval_secs ({}) must be shorter than queue.lease_secs ({})",
                self.queue.touch_interval_secs, self.queue.lease_secs
            )));
        }
        if self.worker.concurrency == 0 {
            return Err(JudgeError::Config("worker.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("results"))
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.queue
            .dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("queue"))
    }

    pub fn status_path(&self) -> PathBuf {
        self.base_dir.join("status.json")
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.queue.lease_secs)
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        let sandbox = &self.sandbox;
        SandboxLimits {
            cpuset: sandbox.cpuset.clone(),
            memory_mb: sandbox.memory_mb,
            pids: sandbox.pids_limit,
            stack: match sandbox.stack_limit_mb {
                Some(mb) => StackLimit::Bytes(mb << 20),
                None => StackLimit::Unlimited,
            },
            compile_timeout: Duration::from_secs(sandbox.compile_timeout_secs),
            tool_timeout: Duration::from_secs(sandbox.checker_timeout_secs),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_secs(self.worker.poll_interval_secs),
            touch_interval: Duration::from_secs(self.queue.touch_interval_secs),
            max_attempts: self.queue.max_attempts,
        }
    }
}
