#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("container engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("container creation failed: {0}")]
    CreationFailed(String),

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("container stop failed: {0}")]
    StopFailed(String),

    #[error("container removal failed: {0}")]
    RemoveFailed(String),

    #[error("container inspect failed: {0}")]
    InspectFailed(String),

    #[error("volume operation failed: {0}")]
    Volume(String),

    #[error("cgroup read failed: {0}")]
    Cgroup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
