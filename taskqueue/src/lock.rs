use std::path::PathBuf;

use nix::fcntl::{Flock, FlockArg};

use crate::error::{QueueError, QueueResult};

/// Take the queue's exclusive lock, waiting until it is free.
///
/// The lock is held until the returned guard is dropped.
pub async fn acquire(path: PathBuf) -> QueueResult<Flock<std::fs::File>> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| QueueError::Lock(format!("open {}: {e}", path.display())))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_file, e)| QueueError::Lock(format!("flock {}: {e}", path.display())))
    })
    .await
    .map_err(|e| QueueError::Lock(format!("lock task: {e}")))?
}
