#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task {0} not found")]
    NotFound(i64),

    #[error("lease of task {0} has expired")]
    LeaseExpired(i64),

    #[error("queue table is corrupt: {0}")]
    Corrupt(String),

    #[error("queue lock failed: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
