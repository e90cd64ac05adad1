use taskqueue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: i64 },

    #[error("result store error: {0}")]
    Store(String),

    #[error("problem assets error: {0}")]
    Assets(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl JudgeError {
    /// The queue entry is no longer ours: the lease ran out or the entry
    /// is gone. Whoever holds it now is responsible for it.
    pub fn is_lease_lost(&self) -> bool {
        matches!(
            self,
            Self::Queue(QueueError::LeaseExpired(_) | QueueError::NotFound(_))
        )
    }
}

pub type JudgeResult<T> = Result<T, JudgeError>;
