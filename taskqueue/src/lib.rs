//! Durable priority task queue with lease-based claims.
//!
//! Entries live in a JSON table guarded by an exclusive file lock, so any
//! number of worker processes on the host can share one queue directory.
//! A popped entry is leased, not removed: if its holder stops renewing the
//! lease, the entry becomes claimable again.

mod error;
mod lock;
mod queue;
mod table;
mod types;

pub use error::{QueueError, QueueResult};
pub use queue::{DEFAULT_LEASE, FileTaskQueue, TaskQueue};
pub use types::{
    ClaimedTask, HACK_PRIORITY, QueueEntry, REJUDGE_PRIORITY, SUBMISSION_PRIORITY, TaskPayload,
};
