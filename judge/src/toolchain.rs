use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{
    Input, Output, ResourceLimits, SandboxRuntime, StackLimit, TaskResult, TaskSpec, Volume,
    VolumeManager, VolumeMount,
};
use tracing::{info, warn};

use crate::error::{JudgeError, JudgeResult};
use crate::lang::Language;

/// Where compiled artifacts are mounted.
pub const WORKDIR: &str = "/workdir";
/// Where the per-case scratch volume is mounted.
pub const CASEDIR: &str = "/casedir";

/// Limits applied to every sandboxed compile and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    pub cpuset: Vec<u32>,
    pub memory_mb: u64,
    pub pids: u32,
    pub stack: StackLimit,
    pub compile_timeout: Duration,
    /// Timeout of trusted tools: checker, verifier and generator.
    pub tool_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            cpuset: Vec::new(),
            memory_mb: 1024,
            pids: 100,
            stack: StackLimit::Unlimited,
            compile_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
        }
    }
}

/// A compile's output volume and result. The caller owns the volume.
pub struct Compiled {
    pub volume: Volume,
    pub result: TaskResult,
}

/// One run of a compiled program.
pub struct Execution<'a> {
    pub program: &'a Volume,
    /// Appended to the language's exec argv.
    pub args: Vec<String>,
    pub stdin: Input,
    pub stdout: Output,
    pub timeout: Duration,
    /// Mounted writable at [`CASEDIR`].
    pub scratch: Option<&'a Volume>,
}

/// Compiles and runs programs in the sandbox.
pub struct Toolchain {
    runtime: SandboxRuntime,
    volumes: VolumeManager,
    limits: SandboxLimits,
}

impl Toolchain {
    pub fn new(runtime: SandboxRuntime, volumes: VolumeManager, limits: SandboxLimits) -> Self {
        Self {
            runtime,
            volumes,
            limits,
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpuset: self.limits.cpuset.clone(),
            memory_mb: Some(self.limits.memory_mb),
            stack: self.limits.stack,
            pids: Some(self.limits.pids),
        }
    }

    pub async fn new_volume(&self) -> JudgeResult<Volume> {
        Ok(self.volumes.create().await?)
    }

    pub async fn stage(&self, volume: &Volume, src: &Path, dst: &str) -> JudgeResult<()> {
        Ok(self.volumes.copy_file(volume, src, dst).await?)
    }

    /// Release a volume, logging instead of failing.
    pub async fn release(&self, volume: Volume) {
        let name = volume.name().to_string();
        if let Err(e) = self.volumes.remove(volume).await {
            warn!(volume = %name, error = %e, "failed to remove volume");
        }
    }

    /// Stage `source` (plus the language's and the caller's extra files)
    /// into a fresh volume and compile it there.
    ///
    /// A failed compile is a result, not an error. On error the volume is
    /// released before returning.
    pub async fn compile(
        &self,
        lang: &Language,
        source: &Path,
        extra_files: &[PathBuf],
    ) -> JudgeResult<Compiled> {
        let volume = self.new_volume().await?;
        match self.compile_in(&volume, lang, source, extra_files).await {
            Ok(result) => Ok(Compiled { volume, result }),
            Err(e) => {
                self.release(volume).await;
                Err(e)
            }
        }
    }

    async fn compile_in(
        &self,
        volume: &Volume,
        lang: &Language,
        source: &Path,
        extra_files: &[PathBuf],
    ) -> JudgeResult<TaskResult> {
        self.stage(volume, source, &lang.source).await?;
        for file in lang.additional_files.iter().chain(extra_files) {
            self.stage_if_present(volume, file).await?;
        }
        if lang.compile.is_empty() {
            return Ok(TaskResult::default());
        }

        let spec = TaskSpec {
            limits: self.resource_limits(),
            workdir: Some(WORKDIR.to_string()),
            volumes: vec![VolumeMount::new(volume, WORKDIR)],
            timeout: Some(self.limits.compile_timeout),
            ..TaskSpec::new(&lang.image, &lang.compile)
        };
        Ok(self.runtime.run(spec).await?)
    }

    async fn stage_if_present(&self, volume: &Volume, file: &Path) -> JudgeResult<()> {
        match tokio::fs::metadata(file).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(file = %file.display(), "additional file not found, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        let name = file
            .file_name()
            .ok_or_else(|| JudgeError::Internal(format!("no file name in {}", file.display())))?
            .to_string_lossy();
        self.stage(volume, file, &name).await
    }

    /// Run a compiled program. The program volume is mounted read-only.
    pub async fn execute(&self, lang: &Language, run: Execution<'_>) -> JudgeResult<TaskResult> {
        let mut volumes = vec![VolumeMount::new(run.program, WORKDIR).read_only()];
        if let Some(scratch) = run.scratch {
            volumes.push(VolumeMount::new(scratch, CASEDIR));
        }
        let spec = TaskSpec {
            limits: self.resource_limits(),
            workdir: Some(WORKDIR.to_string()),
            volumes,
            stdin: run.stdin,
            stdout: run.stdout,
            timeout: Some(run.timeout),
            ..TaskSpec::new(&lang.image, lang.exec.iter().chain(&run.args))
        };
        Ok(self.runtime.run(spec).await?)
    }
}
