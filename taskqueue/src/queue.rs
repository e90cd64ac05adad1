use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::lock;
use crate::table::Table;
use crate::types::{ClaimedTask, QueueEntry, TaskPayload};

/// How long a claim lasts without renewal.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

const TABLE_FILE: &str = "queue.json";
const LOCK_FILE: &str = "queue.lock";

/// Lease-based priority queue shared by judge workers.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task, available immediately. Returns the entry id.
    async fn push(&self, payload: TaskPayload, priority: i32) -> QueueResult<i64>;

    /// Claim the highest-priority available entry, oldest first among
    /// equals, and lease it. `None` when nothing is available.
    async fn pop(&self) -> QueueResult<Option<ClaimedTask>>;

    /// Extend the lease of a claimed entry.
    ///
    /// Fails with [`QueueError::LeaseExpired`] if the lease already ran
    /// out, since another worker may have claimed the entry since.
    async fn touch(&self, id: i64) -> QueueResult<()>;

    /// Remove a finished entry. Removing a missing entry is not an error.
    async fn finish(&self, id: i64) -> QueueResult<()>;
}

/// [`TaskQueue`] stored as a JSON table in a directory.
pub struct FileTaskQueue {
    table_path: PathBuf,
    lock_path: PathBuf,
    lease: chrono::Duration,
}

impl FileTaskQueue {
    /// Open (creating if needed) the queue stored in `dir`.
    pub async fn open(dir: &Path, lease: Duration) -> QueueResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| QueueError::Corrupt(format!("lease out of range: {e}")))?;
        let queue = Self {
            table_path: dir.join(TABLE_FILE),
            lock_path: dir.join(LOCK_FILE),
            lease,
        };
        let pending = queue.transact(|table, _| Ok((table.entries.len(), false))).await?;
        info!(dir = %dir.display(), pending, "task queue opened");
        Ok(queue)
    }

    /// Number of entries, leased or not.
    pub async fn len(&self) -> QueueResult<usize> {
        self.transact(|table, _| Ok((table.entries.len(), false)))
            .await
    }

    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Run `f` on the table under the queue lock. The table is written
    /// back when `f` reports it dirty.
    async fn transact<T>(
        &self,
        f: impl FnOnce(&mut Table, DateTime<Utc>) -> QueueResult<(T, bool)>,
    ) -> QueueResult<T> {
        let _guard = lock::acquire(self.lock_path.clone()).await?;
        let mut table = Table::load(&self.table_path).await?;
        let (out, dirty) = f(&mut table, Utc::now())?;
        if dirty {
            table.store(&self.table_path).await?;
        }
        Ok(out)
    }
}

fn claim(
    entries: &mut [QueueEntry],
    now: DateTime<Utc>,
    lease: chrono::Duration,
) -> Option<ClaimedTask> {
    let entry = entries
        .iter_mut()
        .filter(|e| e.available_at <= now)
        .max_by_key(|e| (e.priority, Reverse(e.id)))?;
    entry.available_at = now + lease;
    entry.attempts = entry.attempts.saturating_add(1);
    Some(ClaimedTask {
        id: entry.id,
        attempts: entry.attempts,
        payload: entry.payload.clone(),
    })
}

#[async_trait]
impl TaskQueue for FileTaskQueue {
    async fn push(&self, payload: TaskPayload, priority: i32) -> QueueResult<i64> {
        let id = self
            .transact(|table, now| {
                table.next_id += 1;
                let id = table.next_id;
                table.entries.push(QueueEntry {
                    id,
                    priority,
                    available_at: now,
                    enqueued_at: now,
                    attempts: 0,
                    payload,
                });
                Ok((id, true))
            })
            .await?;
        debug!(id, priority, "task pushed");
        Ok(id)
    }

    async fn pop(&self) -> QueueResult<Option<ClaimedTask>> {
        let lease = self.lease;
        let claimed = self
            .transact(|table, now| {
                let claimed = claim(&mut table.entries, now, lease);
                let dirty = claimed.is_some();
                Ok((claimed, dirty))
            })
            .await?;
        if let Some(task) = &claimed {
            debug!(id = task.id, attempts = task.attempts, "task claimed");
        }
        Ok(claimed)
    }

    async fn touch(&self, id: i64) -> QueueResult<()> {
        let lease = self.lease;
        self.transact(|table, now| {
            let entry = table
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(QueueError::NotFound(id))?;
            if entry.available_at < now {
                return Err(QueueError::LeaseExpired(id));
            }
            entry.available_at = now + lease;
            Ok(((), true))
        })
        .await?;
        debug!(id, "lease renewed");
        Ok(())
    }

    async fn finish(&self, id: i64) -> QueueResult<()> {
        self.transact(|table, _| {
            let before = table.entries.len();
            table.entries.retain(|e| e.id != id);
            Ok(((), table.entries.len() != before))
        })
        .await?;
        debug!(id, "task finished");
        Ok(())
    }
}
