use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

/// Lifecycle of the judge process. Workers poll only while `Running`;
/// `Draining` lets claimed tasks finish before `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Serialize)]
struct WorkerStatus<'a> {
    name: &'a str,
    mode: WorkerMode,
    active_tasks: usize,
    active_task_ids: Vec<i64>,
    judged: u64,
    #[serde(serialize_with = "serialize_iso")]
    started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_iso")]
    updated_at: DateTime<Utc>,
}

/// `started_at`/`updated_at` as UTC with milliseconds.
fn serialize_iso<S: serde::Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Snapshot of what the judge is doing: its mode, the queue entries its
/// workers hold right now, and how many entries it has settled.
///
/// One tracker is shared by every worker in the process.
pub struct StatusTracker {
    name: String,
    started_at: DateTime<Utc>,
    path: PathBuf,
    state: Mutex<MutableState>,
}

struct MutableState {
    mode: WorkerMode,
    active_task_ids: BTreeSet<i64>,
    judged: u64,
}

impl StatusTracker {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            path,
            state: Mutex::new(MutableState {
                mode: WorkerMode::Running,
                active_task_ids: BTreeSet::new(),
                judged: 0,
            }),
        }
    }

    pub async fn set_mode(&self, mode: WorkerMode) {
        let mut state = self.state.lock().await;
        state.mode = mode;
        self.write_status(&state).await;
    }

    pub async fn add_task(&self, task_id: i64) {
        let mut state = self.state.lock().await;
        state.active_task_ids.insert(task_id);
        self.write_status(&state).await;
    }

    /// Forget a settled entry and count it as judged.
    pub async fn remove_task(&self, task_id: i64) {
        let mut state = self.state.lock().await;
        if state.active_task_ids.remove(&task_id) {
            state.judged += 1;
        }
        self.write_status(&state).await;
    }

    pub async fn write_initial(&self) {
        let state = self.state.lock().await;
        self.write_status(&state).await;
    }

    /// Replaced via a sibling `.tmp` file so readers never see a partial
    /// snapshot. Failures are logged, never fatal to judging.
    async fn write_status(&self, state: &MutableState) {
        let status = WorkerStatus {
            name: &self.name,
            mode: state.mode,
            active_tasks: state.active_task_ids.len(),
            active_task_ids: state.active_task_ids.iter().copied().collect(),
            judged: state.judged,
            started_at: self.started_at,
            updated_at: Utc::now(),
        };

        let json = match serde_json::to_string_pretty(&status) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize status");
                return;
            }
        };

        let tmp = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp, json.as_bytes()).await {
            warn!(error = %e, path = %tmp.display(), "failed to write status temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(error = %e, "failed to rename status file");
        }
    }
}
