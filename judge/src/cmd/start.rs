use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use judge::assets::LocalAssetProvider;
use judge::config;
use judge::context::JudgeContext;
use judge::error::{JudgeError, JudgeResult};
use judge::lang::LanguageRegistry;
use judge::status::{StatusTracker, WorkerMode};
use judge::store::FsResultStore;
use judge::toolchain::Toolchain;
use judge::worker::Worker;
use sandbox::{MonitorStrategy, RuntimeConfig, SandboxRuntime, VolumeManager};
use sandbox_docker::{DockerEngine, cgroup_v2_available};
use taskqueue::{FileTaskQueue, TaskQueue};
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Args)]
pub struct StartArgs {
    /// Path to judge.yaml config file
    #[arg(long, short, env = "JUDGE_CONFIG")]
    config: PathBuf,
    /// Cgroup parent for sandbox containers (overrides config)
    #[arg(long, env = "JUDGE_CGROUP_PARENT")]
    cgroup_parent: Option<String>,
    /// Worker name (overrides config)
    #[arg(long)]
    name: Option<String>,
}

/// Load config, start the workers and block until a signal drains them.
pub async fn run_start(args: StartArgs) -> JudgeResult<()> {
    let mut config = config::load(&args.config).await?;
    if let Some(parent) = args.cgroup_parent {
        config.sandbox.cgroup_parent = Some(parent);
    }
    let name = args
        .name
        .or_else(|| config.name.clone())
        .unwrap_or_else(|| format!("judge-{}", Uuid::new_v4()));

    tokio::fs::create_dir_all(&config.base_dir)
        .await
        .map_err(|e| {
            JudgeError::Config(format!("create base_dir {}: {e}", config.base_dir.display()))
        })?;

    let engine = Arc::new(DockerEngine::new(config.sandbox.docker.clone()).await?);
    if config.sandbox.monitor == MonitorStrategy::HighPrecision
        && !cgroup_v2_available(&config.sandbox.docker.cgroup_root)
    {
        return Err(JudgeError::Config(format!(
            "high_precision monitor needs cgroup v2 under {}; set sandbox.monitor to low_precision",
            config.sandbox.docker.cgroup_root.display()
        )));
    }

    let runtime = SandboxRuntime::new(
        engine.clone(),
        RuntimeConfig {
            monitor: config.sandbox.monitor,
            cgroup_parent: config.sandbox.cgroup_parent.clone(),
            ..RuntimeConfig::default()
        },
    );
    let volumes = VolumeManager::new(engine, config.sandbox.helper_image.clone());
    let ctx = Arc::new(JudgeContext {
        toolchain: Toolchain::new(runtime, volumes, config.sandbox_limits()),
        languages: Arc::new(LanguageRegistry::load(&config.langs).await?),
        store: Arc::new(FsResultStore::open(&config.store_dir()).await?),
        assets: Arc::new(LocalAssetProvider::new(config.problems_dir.clone())),
    });
    let queue: Arc<dyn TaskQueue> =
        Arc::new(FileTaskQueue::open(&config.queue_dir(), config.lease()).await?);
    let status = Arc::new(StatusTracker::new(&name, config.status_path()));
    status.write_initial().await;

    // -----------------------------------------------------------------------
    // Signal handling
    // -----------------------------------------------------------------------
    let (mode_tx, mut mode_rx) = tokio::sync::watch::channel(WorkerMode::Running);

    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();
        let mut sigusr1 = signal(SignalKind::user_defined1()).ok();

        tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, draining");
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, draining");
            }
            _ = recv_signal(&mut sigusr1) => {
                info!("received SIGUSR1, draining");
            }
        }
        let _ = mode_tx.send(WorkerMode::Draining);
    });

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------
    let settings = config.worker_settings();
    let mut workers = JoinSet::new();
    for i in 0..config.worker.concurrency {
        let worker = Worker::new(
            format!("{name}/{i}"),
            Arc::clone(&ctx),
            Arc::clone(&queue),
            Arc::clone(&status),
            settings,
        );
        let mode = mode_rx.clone();
        workers.spawn(async move { worker.run(mode).await });
    }
    info!(
        name = %name,
        concurrency = config.worker.concurrency,
        monitor = ?config.sandbox.monitor,
        "judge started"
    );

    while mode_rx.changed().await.is_ok() {
        let mode = *mode_rx.borrow_and_update();
        status.set_mode(mode).await;
        if mode != WorkerMode::Running {
            break;
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown: in-flight tasks finish first
    // -----------------------------------------------------------------------
    let remaining = workers.len();
    info!(remaining, "waiting for workers to finish");
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "worker task panicked during drain");
        }
    }

    status.set_mode(WorkerMode::Stopped).await;
    info!("judge stopped");
    Ok(())
}

async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
