//! In-memory engine for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::engine::{Container, ContainerEngine, ContainerTimes};
use crate::error::{Result, SandboxError};
use crate::limited::LimitedBuffer;
use crate::spec::{Input, Output, TaskSpec};

/// Behaviour of every container the fake runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProgram {
    pub runtime: Duration,
    pub exit_code: i32,
    pub memory: u64,
    pub stderr: Vec<u8>,
    pub fail_start: bool,
    pub panic: bool,
    /// Pid counts returned by successive `cgroup_procs` calls, one per
    /// sample, then a lone init. Empty means "running while asleep".
    pub procs: Vec<usize>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    live: HashSet<String>,
    started: HashMap<String, Instant>,
    stopped: HashSet<String>,
    times: HashMap<String, ContainerTimes>,
    specs: Vec<TaskSpec>,
    volumes: HashSet<String>,
    copies: Vec<(PathBuf, String)>,
    proc_samples: usize,
}

pub(crate) struct FakeEngine {
    program: FakeProgram,
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new(program: FakeProgram) -> Self {
        Self {
            program,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn live_containers(&self) -> usize {
        self.state().live.len()
    }

    pub fn stopped(&self) -> usize {
        self.state().stopped.len()
    }

    pub fn created_specs(&self) -> Vec<TaskSpec> {
        self.state().specs.clone()
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.state().volumes.contains(name)
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.state().copies.clone()
    }

    fn running(&self, id: &str) -> bool {
        let state = self.state();
        match state.started.get(id) {
            Some(started) => {
                !state.stopped.contains(id) && started.elapsed() < self.program.runtime
            }
            None => false,
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_container(&self, spec: &TaskSpec) -> Result<Container> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.live.insert(id.clone());
        state.specs.push(spec.clone());
        Ok(Container {
            id,
            cgroup_parent: spec.cgroup_parent.clone(),
        })
    }

    async fn start_attached(
        &self,
        container: &Container,
        _stdin: &Input,
        _stdout: &Output,
        stderr: &mut LimitedBuffer,
    ) -> Result<()> {
        if self.program.fail_start {
            return Err(SandboxError::StartFailed("boom".to_string()));
        }
        if self.program.panic {
            panic!("engine exploded");
        }
        let started_at = Utc::now();
        self.state()
            .started
            .insert(container.id.clone(), Instant::now());
        tokio::time::sleep(self.program.runtime).await;
        stderr.write(&self.program.stderr);
        self.state().times.insert(
            container.id.clone(),
            ContainerTimes {
                started_at,
                finished_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stop_container(&self, container: &Container) -> Result<()> {
        self.state().stopped.insert(container.id.clone());
        Ok(())
    }

    async fn remove_container(&self, container: &Container) -> Result<()> {
        if self.state().live.remove(&container.id) {
            Ok(())
        } else {
            Err(SandboxError::RemoveFailed(container.id.clone()))
        }
    }

    async fn exit_code(&self, _container: &Container) -> Result<i32> {
        Ok(self.program.exit_code)
    }

    async fn times(&self, container: &Container) -> Result<ContainerTimes> {
        self.state()
            .times
            .get(&container.id)
            .copied()
            .ok_or_else(|| SandboxError::InspectFailed(container.id.clone()))
    }

    async fn copy_into(&self, _container: &Container, src: &Path, dst: &str) -> Result<()> {
        tokio::fs::metadata(src).await?;
        self.state().copies.push((src.to_path_buf(), dst.to_string()));
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.state().volumes.insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        if self.state().volumes.remove(name) {
            Ok(())
        } else {
            Err(SandboxError::Volume(format!("no such volume: {name}")))
        }
    }

    async fn cgroup_procs(&self, container: &Container) -> Result<Vec<u32>> {
        if !self.program.procs.is_empty() {
            let mut state = self.state();
            let count = self.program.procs.get(state.proc_samples).copied().unwrap_or(1);
            state.proc_samples += 1;
            return Ok((1..=count as u32).collect());
        }
        if self.running(&container.id) {
            Ok(vec![1, 7])
        } else {
            Ok(vec![1])
        }
    }

    async fn memory_current(&self, container: &Container) -> Result<u64> {
        if self.running(&container.id) {
            Ok(self.program.memory)
        } else {
            Ok(0)
        }
    }
}
