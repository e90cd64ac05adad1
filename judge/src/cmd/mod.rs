mod enqueue;
mod start;

pub use enqueue::{EnqueueArgs, run_enqueue};
pub use start::{StartArgs, run_start};
