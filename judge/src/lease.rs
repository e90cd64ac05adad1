use std::sync::Arc;
use std::time::{Duration, Instant};

use taskqueue::TaskQueue;
use tracing::debug;

use crate::error::JudgeResult;

/// Renew leases at most this often.
pub const DEFAULT_TOUCH_INTERVAL: Duration = Duration::from_secs(20);

/// Claim on one queue entry held by the pipeline judging it.
pub struct TaskLease {
    queue: Arc<dyn TaskQueue>,
    task_id: i64,
    interval: Duration,
    last_touch: Option<Instant>,
}

impl TaskLease {
    pub fn new(queue: Arc<dyn TaskQueue>, task_id: i64, interval: Duration) -> Self {
        Self {
            queue,
            task_id,
            interval,
            last_touch: None,
        }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    /// Renew the lease unless it was renewed within the interval.
    pub async fn touch_if_needed(&mut self) -> JudgeResult<()> {
        if let Some(last) = self.last_touch
            && last.elapsed() < self.interval
        {
            return Ok(());
        }
        self.queue.touch(self.task_id).await?;
        self.last_touch = Some(Instant::now());
        debug!(task_id = self.task_id, "lease touched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use taskqueue::{FileTaskQueue, TaskPayload};

    use super::*;

    async fn claimed(lease: Duration) -> (tempfile::TempDir, Arc<dyn TaskQueue>, i64) {
        let dir = tempfile::tempdir().unwrap();
        let queue: Arc<dyn TaskQueue> =
            Arc::new(FileTaskQueue::open(dir.path(), lease).await.unwrap());
        let id = queue.push(TaskPayload::Hack { id: 1 }, 10).await.unwrap();
        queue.pop().await.unwrap().unwrap();
        (dir, queue, id)
    }

    #[tokio::test]
    async fn touches_keep_the_entry_claimed() {
        let (_dir, queue, id) = claimed(Duration::from_millis(300)).await;
        let mut lease = TaskLease::new(Arc::clone(&queue), id, Duration::from_millis(100));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(120)).await;
            lease.touch_if_needed().await.unwrap();
        }
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn touch_within_interval_is_skipped() {
        let (_dir, queue, id) = claimed(Duration::from_millis(100)).await;
        let mut lease = TaskLease::new(Arc::clone(&queue), id, Duration::from_secs(60));

        lease.touch_if_needed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // skipped, so the expired lease goes unnoticed
        lease.touch_if_needed().await.unwrap();
        assert!(queue.pop().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_surfaces_as_lost() {
        let (_dir, queue, id) = claimed(Duration::from_millis(50)).await;
        let mut lease = TaskLease::new(queue, id, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = lease.touch_if_needed().await.unwrap_err();
        assert!(err.is_lease_lost(), "{err}");
    }
}
