use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sandbox::{
    Container, ContainerEngine, ContainerTimes, Input, LimitedBuffer, Output, Result,
    SandboxError, TaskSpec,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{info, trace};

use crate::args::create_args;
use crate::cgroup::{cgroup_dirs, parse_memory, parse_procs, read_first};
use crate::command::exec;
use crate::config::DockerConfig;
use crate::prerequisites::check_prerequisites;

/// [`ContainerEngine`] backed by the `docker` CLI.
pub struct DockerEngine {
    config: DockerConfig,
}

impl DockerEngine {
    /// Check that docker is usable and build the engine.
    pub async fn new(config: DockerConfig) -> Result<Self> {
        check_prerequisites(&config).await?;
        info!(binary = %config.binary, "docker engine ready");
        Ok(Self { config })
    }

    async fn docker(
        &self,
        args: &[&str],
    ) -> std::result::Result<String, crate::command::CommandError> {
        exec(&self.config.binary, args).await
    }

    async fn inspect(&self, container: &Container, format: &str) -> Result<String> {
        let format = format!("--format={format}");
        self.docker(&["inspect", &format, &container.id])
            .await
            .map_err(|e| SandboxError::InspectFailed(e.to_string()))
    }

    fn cgroup_dirs(&self, container: &Container) -> [std::path::PathBuf; 2] {
        cgroup_dirs(
            &self.config.cgroup_root,
            &container.id,
            container.cgroup_parent.as_deref(),
        )
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SandboxError::InspectFailed(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_times(raw: &str) -> Result<ContainerTimes> {
    let (started, finished) = raw
        .split_once(' ')
        .ok_or_else(|| SandboxError::InspectFailed(format!("unexpected inspect output {raw:?}")))?;
    Ok(ContainerTimes {
        started_at: parse_time(started)?,
        finished_at: parse_time(finished)?,
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create_container(&self, spec: &TaskSpec) -> Result<Container> {
        let args = create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self
            .docker(&args)
            .await
            .map_err(|e| SandboxError::CreationFailed(e.to_string()))?;
        Ok(Container {
            id,
            cgroup_parent: spec.cgroup_parent.clone(),
        })
    }

    async fn start_attached(
        &self,
        container: &Container,
        stdin: &Input,
        stdout: &Output,
        stderr: &mut LimitedBuffer,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(["start", "-i", container.id.as_str()])
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut feed = None;
        match stdin {
            Input::Null => {
                cmd.stdin(Stdio::null());
            }
            Input::File(path) => {
                let file = tokio::fs::File::open(path).await?.into_std().await;
                cmd.stdin(Stdio::from(file));
            }
            Input::Bytes(bytes) => {
                cmd.stdin(Stdio::piped());
                feed = Some(bytes.clone());
            }
        }
        match stdout {
            Output::Discard => {
                cmd.stdout(Stdio::null());
            }
            Output::File(path) => {
                let file = tokio::fs::File::create(path).await?.into_std().await;
                cmd.stdout(Stdio::from(file));
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::StartFailed(format!("{}: {e}", container.id)))?;

        if let Some(bytes) = feed
            && let Some(mut pipe) = child.stdin.take()
        {
            let id = container.id.clone();
            tokio::spawn(async move {
                // The program may exit without draining stdin.
                if let Err(e) = pipe.write_all(&bytes).await {
                    trace!(container = %id, error = %e, "stdin feed stopped");
                }
            });
        }

        if let Some(mut pipe) = child.stderr.take() {
            let mut chunk = [0u8; 4096];
            loop {
                let n = pipe.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                stderr.write(chunk.get(..n).unwrap_or_default());
            }
        }

        let status = child.wait().await?;
        trace!(container = %container.id, ?status, "docker start exited");
        Ok(())
    }

    async fn stop_container(&self, container: &Container) -> Result<()> {
        self.docker(&["stop", "--time", "0", &container.id])
            .await
            .map(drop)
            .map_err(|e| SandboxError::StopFailed(e.to_string()))
    }

    async fn remove_container(&self, container: &Container) -> Result<()> {
        self.docker(&["container", "rm", "--force", &container.id])
            .await
            .map(drop)
            .map_err(|e| SandboxError::RemoveFailed(e.to_string()))
    }

    async fn exit_code(&self, container: &Container) -> Result<i32> {
        let raw = self.inspect(container, "{{.State.ExitCode}}").await?;
        raw.parse()
            .map_err(|e| SandboxError::InspectFailed(format!("invalid exit code {raw:?}: {e}")))
    }

    async fn times(&self, container: &Container) -> Result<ContainerTimes> {
        let raw = self
            .inspect(container, "{{.State.StartedAt}} {{.State.FinishedAt}}")
            .await?;
        parse_times(&raw)
    }

    async fn copy_into(&self, container: &Container, src: &Path, dst: &str) -> Result<()> {
        let src = src.to_string_lossy();
        let target = format!("{}:{dst}", container.id);
        self.docker(&["cp", &src, &target])
            .await
            .map(drop)
            .map_err(|e| SandboxError::Volume(e.to_string()))
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.docker(&["volume", "create", "--name", name])
            .await
            .map(drop)
            .map_err(|e| SandboxError::Volume(e.to_string()))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker(&["volume", "rm", name])
            .await
            .map(drop)
            .map_err(|e| SandboxError::Volume(e.to_string()))
    }

    async fn cgroup_procs(&self, container: &Container) -> Result<Vec<u32>> {
        let content = read_first(&self.cgroup_dirs(container), "cgroup.procs").await?;
        Ok(parse_procs(&content))
    }

    async fn memory_current(&self, container: &Container) -> Result<u64> {
        let content = read_first(&self.cgroup_dirs(container), "memory.current").await?;
        parse_memory(&content)
    }
}
