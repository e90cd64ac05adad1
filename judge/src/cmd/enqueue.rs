use std::path::PathBuf;

use clap::{Args, Subcommand};
use judge::config;
use judge::error::JudgeResult;
use taskqueue::{
    FileTaskQueue, HACK_PRIORITY, REJUDGE_PRIORITY, SUBMISSION_PRIORITY, TaskPayload, TaskQueue,
};
use tracing::info;

#[derive(Args)]
pub struct EnqueueArgs {
    /// Path to judge.yaml config file
    #[arg(long, short, env = "JUDGE_CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Judge a submission
    Submission {
        id: i64,
        /// Queue behind fresh submissions
        #[arg(long)]
        rejudge: bool,
        /// Stop at the first time limit exceeded case
        #[arg(long)]
        tle_knockout: bool,
    },
    /// Judge a hack
    Hack { id: i64 },
}

/// Push one task and print its queue id.
pub async fn run_enqueue(args: EnqueueArgs) -> JudgeResult<()> {
    let config = config::load(&args.config).await?;
    let queue = FileTaskQueue::open(&config.queue_dir(), config.lease()).await?;

    let (payload, priority) = match args.task {
        Task::Submission {
            id,
            rejudge,
            tle_knockout,
        } => {
            let priority = if rejudge {
                REJUDGE_PRIORITY
            } else {
                SUBMISSION_PRIORITY
            };
            (TaskPayload::Submission { id, tle_knockout }, priority)
        }
        Task::Hack { id } => (TaskPayload::Hack { id }, HACK_PRIORITY),
    };
    let task_id = queue.push(payload, priority).await?;
    info!(task_id, priority, "task enqueued");
    println!("{task_id}");
    Ok(())
}
