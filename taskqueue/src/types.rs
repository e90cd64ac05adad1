use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority of a first-time submission judge.
pub const SUBMISSION_PRIORITY: i32 = 50;
/// Priority of a rejudge; below fresh submissions.
pub const REJUDGE_PRIORITY: i32 = 45;
pub const HACK_PRIORITY: i32 = 10;

/// What a worker is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Submission {
        id: i64,
        /// Stop running cases after the first time limit exceeded.
        #[serde(default)]
        tle_knockout: bool,
    },
    Hack {
        id: i64,
    },
}

/// One row of the queue table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub priority: i32,
    /// The entry is claimable once this instant has passed.
    pub available_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// How many times the entry has been claimed.
    #[serde(default)]
    pub attempts: u32,
    pub payload: TaskPayload,
}

/// An entry handed to a worker by `pop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    pub id: i64,
    /// Claims so far, this one included.
    pub attempts: u32,
    pub payload: TaskPayload,
}
