//! Scripted container engine and fixtures for pipeline tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sandbox::{
    Container, ContainerEngine, ContainerTimes, Input, LimitedBuffer, MonitorStrategy, Output,
    RuntimeConfig, SandboxError, SandboxRuntime, TaskSpec, VolumeManager,
};
use taskqueue::{FileTaskQueue, TaskPayload, TaskQueue};
use tempfile::TempDir;

use crate::assets::{LocalAssetProvider, ProblemRef};
use crate::context::JudgeContext;
use crate::lang::LanguageRegistry;
use crate::lease::TaskLease;
use crate::store::{FsResultStore, HackInput, HackRecord, ResultStore, SubmissionRecord};
use crate::toolchain::{SandboxLimits, Toolchain, WORKDIR};
use crate::verdict::JudgeStatus;

/// What a started container saw.
#[derive(Debug, Clone)]
pub(crate) struct RunRequest {
    pub image: String,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
    /// Mounted volume contents by absolute container path.
    pub files: HashMap<String, Vec<u8>>,
}

impl RunRequest {
    pub fn file(&self, path: &str) -> String {
        self.files
            .get(path)
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default()
    }

    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }
}

/// What a scripted container does.
#[derive(Debug, Default)]
pub(crate) struct Reply {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Reported through the engine's timestamps.
    pub time: Duration,
    pub memory: u64,
}

type Script = dyn Fn(&RunRequest) -> Reply + Send + Sync;

struct ContainerState {
    spec: TaskSpec,
    exit_code: i32,
    memory: u64,
    times: Option<ContainerTimes>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    containers: HashMap<String, ContainerState>,
    volumes: HashMap<String, HashMap<String, Vec<u8>>>,
    runs: Vec<RunRequest>,
}

/// Engine that answers every container start from a script, tracking
/// volume contents so staged files are visible to later runs.
pub(crate) struct ScriptedEngine {
    script: Box<Script>,
    state: Mutex<State>,
}

impl ScriptedEngine {
    pub fn new(script: impl Fn(&RunRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn live_containers(&self) -> usize {
        self.state().containers.len()
    }

    pub fn live_volumes(&self) -> usize {
        self.state().volumes.len()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.state().runs.clone()
    }

    pub fn ran(&self, program: &str) -> bool {
        self.state().runs.iter().any(|run| run.program() == program)
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_container(&self, spec: &TaskSpec) -> sandbox::Result<Container> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.containers.insert(
            id.clone(),
            ContainerState {
                spec: spec.clone(),
                exit_code: 0,
                memory: 0,
                times: None,
            },
        );
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
    ) -> sandbox::Result<()> {
        let stdin = match stdin {
            Input::Null => Vec::new(),
            Input::File(path) => tokio::fs::read(path).await?,
            Input::Bytes(bytes) => bytes.clone(),
        };
        let request = {
            let state = self.state();
            let spec = &state
                .containers
                .get(&container.id)
                .ok_or_else(|| SandboxError::StartFailed(container.id.clone()))?
                .spec;
            let mut files = HashMap::new();
            for mount in &spec.volumes {
                for (name, data) in state.volumes.get(&mount.volume).into_iter().flatten() {
                    files.insert(format!("{}/{name}", mount.container_path), data.clone());
                }
            }
            RunRequest {
                image: spec.image.clone(),
                args: spec.args.clone(),
                stdin,
                files,
            }
        };

        let reply = (self.script)(&request);
        if let Output::File(path) = stdout {
            tokio::fs::write(path, &reply.stdout).await?;
        }
        stderr.write(&reply.stderr);

        let started_at = Utc::now();
        let elapsed = chrono::Duration::from_std(reply.time).unwrap_or(chrono::Duration::zero());
        {
            let mut state = self.state();
            if let Some(c) = state.containers.get_mut(&container.id) {
                c.exit_code = reply.exit_code;
                c.memory = reply.memory;
                c.times = Some(ContainerTimes {
                    started_at,
                    finished_at: started_at + elapsed,
                });
            }
            state.runs.push(request);
        }
        // let the monitor sample the memory counter
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }

    async fn stop_container(&self, _container: &Container) -> sandbox::Result<()> {
        Ok(())
    }

    async fn remove_container(&self, container: &Container) -> sandbox::Result<()> {
        self.state()
            .containers
            .remove(&container.id)
            .map(|_| ())
            .ok_or_else(|| SandboxError::RemoveFailed(container.id.clone()))
    }

    async fn exit_code(&self, container: &Container) -> sandbox::Result<i32> {
        self.state()
            .containers
            .get(&container.id)
            .map(|c| c.exit_code)
            .ok_or_else(|| SandboxError::InspectFailed(container.id.clone()))
    }

    async fn times(&self, container: &Container) -> sandbox::Result<ContainerTimes> {
        self.state()
            .containers
            .get(&container.id)
            .and_then(|c| c.times)
            .ok_or_else(|| SandboxError::InspectFailed(container.id.clone()))
    }

    async fn copy_into(&self, container: &Container, src: &Path, dst: &str) -> sandbox::Result<()> {
        let data = tokio::fs::read(src).await?;
        let mut state = self.state();
        let (volume, name) = {
            let spec = &state
                .containers
                .get(&container.id)
                .ok_or_else(|| SandboxError::InspectFailed(container.id.clone()))?
                .spec;
            spec.volumes
                .iter()
                .find_map(|mount| {
                    dst.strip_prefix(&format!("{}/", mount.container_path))
                        .map(|name| (mount.volume.clone(), name.to_string()))
                })
                .ok_or_else(|| SandboxError::Volume(format!("{dst} is not on a volume")))?
        };
        state
            .volumes
            .get_mut(&volume)
            .ok_or_else(|| SandboxError::Volume(format!("no such volume: {volume}")))?
            .insert(name, data);
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> sandbox::Result<()> {
        self.state().volumes.insert(name.to_string(), HashMap::new());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> sandbox::Result<()> {
        self.state()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SandboxError::Volume(format!("no such volume: {name}")))
    }

    async fn cgroup_procs(&self, _container: &Container) -> sandbox::Result<Vec<u32>> {
        Ok(vec![1])
    }

    async fn memory_current(&self, container: &Container) -> sandbox::Result<u64> {
        Ok(self
            .state()
            .containers
            .get(&container.id)
            .map(|c| c.memory)
            .unwrap_or_default())
    }
}

fn numbers(text: &str) -> Vec<i64> {
    text.split_whitespace().filter_map(|n| n.parse().ok()).collect()
}

fn ok(stdout: impl Into<Vec<u8>>) -> Reply {
    Reply {
        stdout: stdout.into(),
        time: Duration::from_millis(20),
        memory: 8 << 20,
        ..Reply::default()
    }
}

fn fail(exit_code: i32, stderr: &str) -> Reply {
    Reply {
        exit_code,
        stderr: stderr.as_bytes().to_vec(),
        time: Duration::from_millis(5),
        ..Reply::default()
    }
}

/// A world where every program is about adding two numbers.
///
/// Behaviour is keyed on markers in the staged sources: `BROKEN` fails to
/// compile, `CRASH` exits nonzero, `SLOW` runs for a second, `WRONG`
/// answers off by one and `HACKABLE` is wrong only when both numbers are
/// equal. The checker compares answers exactly.
pub(crate) fn aplusb(req: &RunRequest) -> Reply {
    let at = |file: &str| req.file(&format!("{WORKDIR}/{file}"));
    match req.program() {
        "g++" => {
            let source = at(req.args.last().map(String::as_str).unwrap_or_default());
            if source.contains("BROKEN") {
                fail(1, "main.cpp:1:1: error: expected ';' before '}' token")
            } else {
                ok("")
            }
        }
        "./checker" => {
            let source = at("checker.cpp");
            if source.contains("CRASH") {
                return fail(3, "checker failure");
            }
            if source.contains("SLOW") {
                return Reply {
                    time: Duration::from_secs(60),
                    ..ok("")
                };
            }
            let arg = |i: usize| req.file(req.args.get(i).map(String::as_str).unwrap_or_default());
            let (actual, expected) = (arg(2), arg(3));
            if actual.trim() == expected.trim() {
                ok("")
            } else {
                fail(
                    1,
                    &format!("wrong answer: expected {}, found {}", expected.trim(), actual.trim()),
                )
            }
        }
        "./verifier" => {
            let input = String::from_utf8_lossy(&req.stdin).into_owned();
            let nums = numbers(&input);
            if nums.len() == 2 && nums.iter().all(|n| (0..=1_000_000_000).contains(n)) {
                ok("")
            } else {
                fail(1, "invalid input: expected two integers in [0, 1e9]")
            }
        }
        "./generator" => {
            if at("generator.cpp").contains("CRASH") {
                fail(1, "generator failed")
            } else {
                ok("4 5\n")
            }
        }
        "./main" | "python3" => {
            let source = if req.program() == "python3" {
                at("main.py")
            } else {
                at("main.cpp")
            };
            let input = String::from_utf8_lossy(&req.stdin).into_owned();
            let nums = numbers(&input);
            let sum: i64 = nums.iter().sum();
            if source.contains("CRASH") {
                fail(139, "Segmentation fault")
            } else if source.contains("SLOW") {
                Reply {
                    time: Duration::from_secs(1),
                    ..ok(format!("{sum}\n"))
                }
            } else if source.contains("WRONG") {
                ok(format!("{}\n", sum + 1))
            } else if source.contains("HACKABLE") && nums.first() == nums.get(1) {
                ok("0\n")
            } else {
                ok(format!("{sum}\n"))
            }
        }
        other => fail(127, &format!("{other}: not found")),
    }
}

const LANGS: &str = r#"
langs:
  - id: cpp
    name: C++
    source: main.cpp
    image: library-checker-images-gcc
    compile: [g++, -O2, -o, main, main.cpp]
    exec: [./main]
  - id: python3
    name: Python
    source: main.py
    image: library-checker-images-python3
    exec: [python3, main.py]
"#;

pub(crate) const CASES: [(&str, &str, &str); 4] = [
    ("example_00", "1 2\n", "3\n"),
    ("example_01", "3 4\n", "7\n"),
    ("random_00", "10 20\n", "30\n"),
    ("random_01", "100 200\n", "300\n"),
];

async fn write(path: &Path, content: &str) {
    tokio::fs::create_dir_all(path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(path, content).await.unwrap();
}

async fn problem_tree(root: &Path, checker: &str) -> ProblemRef {
    let dir = root.join("aplusb").join("v1");
    write(
        &dir.join("info.yaml"),
        "title: A + B\ntime_limit: 0.2\ntests:\n  - {name: example.in, number: 2}\n  - {name: random.cpp, number: 2}\n",
    )
    .await;
    write(&dir.join("checker.cpp"), checker).await;
    write(&dir.join("verifier.cpp"), "// verifier").await;
    write(&dir.join("params.h"), "#define MAX 1000000000").await;
    write(&dir.join("sol").join("correct.cpp"), "// model solution").await;
    for (case, input, output) in CASES {
        write(&dir.join("in").join(format!("{case}.in")), input).await;
        write(&dir.join("out").join(format!("{case}.out")), output).await;
    }
    ProblemRef {
        name: "aplusb".into(),
        version: "v1".into(),
    }
}

/// A judge context over the scripted A + B world.
pub(crate) struct Fixture {
    _dir: TempDir,
    pub engine: Arc<ScriptedEngine>,
    pub ctx: Arc<JudgeContext>,
    pub queue: Arc<FileTaskQueue>,
    pub problem: ProblemRef,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_checker("// checker").await
    }

    pub async fn with_checker(checker: &str) -> Self {
        Self::build(checker, ScriptedEngine::new(aplusb)).await
    }

    pub async fn with_script(
        script: impl Fn(&RunRequest) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self::build("// checker", ScriptedEngine::new(script)).await
    }

    async fn build(checker: &str, engine: ScriptedEngine) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let problem = problem_tree(&dir.path().join("problems"), checker).await;

        let engine = Arc::new(engine);
        let runtime = SandboxRuntime::new(
            engine.clone(),
            RuntimeConfig {
                monitor: MonitorStrategy::LowPrecision,
                cgroup_parent: None,
                sample_interval: Duration::from_millis(1),
            },
        );
        let volumes = VolumeManager::new(engine.clone(), sandbox::HELPER_IMAGE);
        let ctx = Arc::new(JudgeContext {
            toolchain: Toolchain::new(runtime, volumes, SandboxLimits::default()),
            languages: Arc::new(LanguageRegistry::from_yaml(LANGS, dir.path()).unwrap()),
            store: Arc::new(FsResultStore::open(&dir.path().join("store")).await.unwrap()),
            assets: Arc::new(LocalAssetProvider::new(dir.path().join("problems"))),
        });
        let queue = Arc::new(
            FileTaskQueue::open(&dir.path().join("queue"), Duration::from_secs(60))
                .await
                .unwrap(),
        );
        Self {
            _dir: dir,
            engine,
            ctx,
            queue,
            problem,
        }
    }

    pub async fn submission(&self, id: i64, lang: &str, source: &str) -> SubmissionRecord {
        let record = SubmissionRecord {
            id,
            problem: self.problem.clone(),
            lang: lang.into(),
            source: source.into(),
            status: JudgeStatus::Waiting,
            prev_status: None,
            max_time_ms: None,
            max_memory: None,
            compile_error: Vec::new(),
            judged_version: None,
            judged_at: None,
        };
        self.ctx.store.update_submission(&record).await.unwrap();
        record
    }

    pub async fn hack(&self, id: i64, submission_id: i64, input: HackInput) -> HackRecord {
        let record = HackRecord {
            id,
            submission_id,
            input,
            status: JudgeStatus::Waiting,
            time_ms: None,
            memory: None,
            stderr: Vec::new(),
            judge_output: Vec::new(),
            judged_at: None,
        };
        self.ctx.store.update_hack(&record).await.unwrap();
        record
    }

    /// Enqueue and claim `payload`, returning a lease on it.
    pub async fn lease(&self, payload: TaskPayload) -> TaskLease {
        let id = self.queue.push(payload, 50).await.unwrap();
        let claimed = self.queue.pop().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        TaskLease::new(self.queue.clone(), id, Duration::from_secs(20))
    }

    pub fn dyn_queue(&self) -> Arc<dyn TaskQueue> {
        self.queue.clone()
    }

    pub fn store(&self) -> &dyn ResultStore {
        self.ctx.store.as_ref()
    }
}
