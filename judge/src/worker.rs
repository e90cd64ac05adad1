use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use taskqueue::{ClaimedTask, TaskPayload, TaskQueue};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::JudgeContext;
use crate::error::{JudgeError, JudgeResult};
use crate::hack;
use crate::lease::{DEFAULT_TOUCH_INTERVAL, TaskLease};
use crate::status::{StatusTracker, WorkerMode};
use crate::submission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    pub touch_interval: Duration,
    /// Entries claimed more often than this are given up as `IE`.
    pub max_attempts: Option<u32>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            touch_interval: DEFAULT_TOUCH_INTERVAL,
            max_attempts: Some(5),
        }
    }
}

/// Polls the queue and judges one task at a time.
pub struct Worker {
    name: String,
    ctx: Arc<JudgeContext>,
    queue: Arc<dyn TaskQueue>,
    status: Arc<StatusTracker>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        ctx: Arc<JudgeContext>,
        queue: Arc<dyn TaskQueue>,
        status: Arc<StatusTracker>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            ctx,
            queue,
            status,
            settings,
        }
    }

    /// Poll until `mode` leaves [`WorkerMode::Running`]. A task already
    /// claimed is always judged to the end first.
    pub async fn run(&self, mut mode: watch::Receiver<WorkerMode>) {
        info!(worker = %self.name, "worker started");
        loop {
            if *mode.borrow_and_update() != WorkerMode::Running {
                break;
            }
            match self.queue.pop().await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker = %self.name, error = %e, "queue pop failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(worker = %self.name, "worker stopped");
    }

    /// Judge one claimed task and settle its queue entry.
    ///
    /// The entry is finished once a terminal status is stored. It stays
    /// leased, and is retried after the lease expires, when the status
    /// could not be stored or the judge panicked.
    pub async fn process_task(&self, task: ClaimedTask) {
        let task_id = task.id;
        self.status.add_task(task_id).await;
        let handled = AssertUnwindSafe(self.handle(task)).catch_unwind().await;
        if handled.is_err() {
            error!(worker = %self.name, task_id, "judge task panicked, entry left leased");
        }
        self.status.remove_task(task_id).await;
    }

    async fn handle(&self, task: ClaimedTask) {
        let task_id = task.id;
        info!(
            worker = %self.name,
            task_id,
            payload = ?task.payload,
            attempts = task.attempts,
            "task claimed"
        );

        if let Some(max) = self.settings.max_attempts
            && task.attempts > max
        {
            warn!(task_id, attempts = task.attempts, max, "attempt limit exceeded, giving up");
            self.give_up(task_id, &task.payload).await;
            return;
        }

        let mut lease =
            TaskLease::new(Arc::clone(&self.queue), task_id, self.settings.touch_interval);
        let judged = match task.payload {
            TaskPayload::Submission { id, tle_knockout } => {
                submission::judge_submission(&self.ctx, &mut lease, id, tle_knockout).await
            }
            TaskPayload::Hack { id } => hack::judge_hack(&self.ctx, &mut lease, id).await,
        };

        match judged {
            Ok(()) => self.finish(task_id).await,
            Err(e) if e.is_lease_lost() => {
                warn!(task_id, error = %e, "lease lost, leaving the entry to its new owner");
            }
            Err(e) if is_own_record_missing(&e, &task.payload) => {
                warn!(task_id, error = %e, "record missing, dropping task");
                self.finish(task_id).await;
            }
            Err(e) => {
                error!(task_id, error = %e, "judge failed");
                self.give_up(task_id, &task.payload).await;
            }
        }
    }

    /// Store `IE` and finish the entry, or leave it leased if `IE` cannot
    /// be stored.
    async fn give_up(&self, task_id: i64, payload: &TaskPayload) {
        match self.mark_internal_error(payload).await {
            Ok(()) => self.finish(task_id).await,
            Err(e @ JudgeError::RecordNotFound { .. }) => {
                warn!(task_id, error = %e, "record missing, dropping task");
                self.finish(task_id).await;
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to store IE, entry left leased for retry");
            }
        }
    }

    async fn mark_internal_error(&self, payload: &TaskPayload) -> JudgeResult<()> {
        match *payload {
            TaskPayload::Submission { id, .. } => {
                submission::mark_internal_error(&self.ctx, id).await
            }
            TaskPayload::Hack { id } => hack::mark_internal_error(&self.ctx, id).await,
        }
    }

    async fn finish(&self, task_id: i64) {
        match self.queue.finish(task_id).await {
            Ok(()) => debug!(task_id, "task finished"),
            Err(e) => error!(task_id, error = %e, "failed to finish task"),
        }
    }
}

/// Whether `err` says the task's own record is gone. Any other missing
/// record (a hack's target submission) is a judge failure.
fn is_own_record_missing(err: &JudgeError, payload: &TaskPayload) -> bool {
    let JudgeError::RecordNotFound { kind, id } = *err else {
        return false;
    };
    match *payload {
        TaskPayload::Submission { id: own, .. } => kind == "submission" && id == own,
        TaskPayload::Hack { id: own } => kind == "hack" && id == own,
    }
}
