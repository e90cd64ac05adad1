use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{QueueError, QueueResult};
use crate::types::QueueEntry;

/// On-disk queue contents.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Table {
    pub next_id: i64,
    pub entries: Vec<QueueEntry>,
}

impl Table {
    /// Load the table, treating a missing file as empty.
    pub async fn load(path: &Path) -> QueueResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| QueueError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: write and sync a temp file in the same directory,
    /// then rename it over the table.
    pub async fn store(&self, path: &Path) -> QueueResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| QueueError::Corrupt(format!("serialize: {e}")))?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
