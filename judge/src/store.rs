use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::assets::ProblemRef;
use crate::error::{JudgeError, JudgeResult};
use crate::verdict::{CaseResult, JudgeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub problem: ProblemRef,
    pub lang: String,
    pub source: String,
    pub status: JudgeStatus,
    #[serde(default)]
    pub prev_status: Option<JudgeStatus>,
    #[serde(default)]
    pub max_time_ms: Option<u64>,
    #[serde(default)]
    pub max_memory: Option<u64>,
    #[serde(default)]
    pub compile_error: Vec<u8>,
    /// Testcase version the current status was judged against.
    #[serde(default)]
    pub judged_version: Option<String>,
    #[serde(default)]
    pub judged_at: Option<DateTime<Utc>>,
}

/// Per-testcase row of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestcaseRecord {
    pub submission_id: i64,
    pub testcase: String,
    pub display_order: usize,
    pub status: JudgeStatus,
    pub time_ms: u64,
    pub memory: u64,
    pub tle: bool,
    #[serde(default)]
    pub stderr: Vec<u8>,
    #[serde(default)]
    pub checker_out: Vec<u8>,
}

impl TestcaseRecord {
    /// Row of a case that has not run (yet).
    pub fn pending(submission_id: i64, testcase: &str, display_order: usize) -> Self {
        Self {
            submission_id,
            testcase: testcase.to_string(),
            display_order,
            status: JudgeStatus::Waiting,
            time_ms: 0,
            memory: 0,
            tle: false,
            stderr: Vec::new(),
            checker_out: Vec::new(),
        }
    }

    pub fn from_case(submission_id: i64, display_order: usize, case: &CaseResult) -> Self {
        Self {
            submission_id,
            testcase: case.name.clone(),
            display_order,
            status: JudgeStatus::Done(case.verdict),
            time_ms: case.time.as_millis() as u64,
            memory: case.memory,
            tle: case.tle,
            stderr: case.stderr.clone(),
            checker_out: case.checker_out.clone(),
        }
    }
}

/// Input of a hack: literal text, or a generator program printing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HackInput {
    Text(String),
    /// C++ generator source.
    Generator(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HackRecord {
    pub id: i64,
    /// Submission under attack.
    pub submission_id: i64,
    pub input: HackInput,
    pub status: JudgeStatus,
    #[serde(default)]
    pub time_ms: Option<u64>,
    #[serde(default)]
    pub memory: Option<u64>,
    /// Program stderr.
    #[serde(default)]
    pub stderr: Vec<u8>,
    /// Checker, verifier or generator output explaining the status.
    #[serde(default)]
    pub judge_output: Vec<u8>,
    #[serde(default)]
    pub judged_at: Option<DateTime<Utc>>,
}

/// Where judging results are read from and written to.
///
/// Every write overwrites, so retried and repeated judges are safe.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn fetch_submission(&self, id: i64) -> JudgeResult<SubmissionRecord>;
    async fn fetch_hack(&self, id: i64) -> JudgeResult<HackRecord>;
    async fn update_submission(&self, record: &SubmissionRecord) -> JudgeResult<()>;
    async fn update_hack(&self, record: &HackRecord) -> JudgeResult<()>;
    async fn clear_testcase_results(&self, submission_id: i64) -> JudgeResult<()>;
    /// Insert or replace the row for `(submission_id, testcase)`.
    async fn save_testcase_result(&self, result: &TestcaseRecord) -> JudgeResult<()>;
    /// Rows of a submission in display order.
    async fn testcase_results(&self, submission_id: i64) -> JudgeResult<Vec<TestcaseRecord>>;
}

/// [`ResultStore`] keeping one JSON document per record under a directory.
pub struct FsResultStore {
    root: PathBuf,
    // serialises read-modify-write of testcase files
    results_lock: Mutex<()>,
}

impl FsResultStore {
    pub async fn open(root: &Path) -> JudgeResult<Self> {
        for sub in ["submissions", "hacks", "results"] {
            tokio::fs::create_dir_all(root.join(sub))
                .await
                .map_err(|e| {
                    JudgeError::Store(format!("create {}: {e}", root.join(sub).display()))
                })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            results_lock: Mutex::new(()),
        })
    }

    fn submission_path(&self, id: i64) -> PathBuf {
        self.root.join("submissions").join(format!("{id}.json"))
    }

    fn hack_path(&self, id: i64) -> PathBuf {
        self.root.join("hacks").join(format!("{id}.json"))
    }

    fn results_path(&self, submission_id: i64) -> PathBuf {
        self.root.join("results").join(format!("{submission_id}.json"))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> JudgeResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| JudgeError::Store(format!("parse {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(JudgeError::Store(format!("read {}: {e}", path.display()))),
    }
}

/// Atomic write: write to a temp file in the same directory, then rename.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> JudgeResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| JudgeError::Store(format!("serialize {}: {e}", path.display())))?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| JudgeError::Store(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| JudgeError::Store(format!("rename {}: {e}", path.display())))
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn fetch_submission(&self, id: i64) -> JudgeResult<SubmissionRecord> {
        read_json(&self.submission_path(id))
            .await?
            .ok_or(JudgeError::RecordNotFound {
                kind: "submission",
                id,
            })
    }

    async fn fetch_hack(&self, id: i64) -> JudgeResult<HackRecord> {
        read_json(&self.hack_path(id))
            .await?
            .ok_or(JudgeError::RecordNotFound { kind: "hack", id })
    }

    async fn update_submission(&self, record: &SubmissionRecord) -> JudgeResult<()> {
        write_json(&self.submission_path(record.id), record).await
    }

    async fn update_hack(&self, record: &HackRecord) -> JudgeResult<()> {
        write_json(&self.hack_path(record.id), record).await
    }

    async fn clear_testcase_results(&self, submission_id: i64) -> JudgeResult<()> {
        let _guard = self.results_lock.lock().await;
        match tokio::fs::remove_file(self.results_path(submission_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JudgeError::Store(format!("clear results of {submission_id}: {e}"))),
        }
    }

    async fn save_testcase_result(&self, result: &TestcaseRecord) -> JudgeResult<()> {
        let _guard = self.results_lock.lock().await;
        let path = self.results_path(result.submission_id);
        let mut rows: Vec<TestcaseRecord> = read_json(&path).await?.unwrap_or_default();
        match rows.iter_mut().find(|row| row.testcase == result.testcase) {
            Some(row) => *row = result.clone(),
            None => rows.push(result.clone()),
        }
        rows.sort_by_key(|row| row.display_order);
        write_json(&path, &rows).await
    }

    async fn testcase_results(&self, submission_id: i64) -> JudgeResult<Vec<TestcaseRecord>> {
        let _guard = self.results_lock.lock().await;
        Ok(read_json(&self.results_path(submission_id))
            .await?
            .unwrap_or_default())
    }
}
