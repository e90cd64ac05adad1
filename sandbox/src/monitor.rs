use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::{Container, ContainerEngine};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// How elapsed time is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStrategy {
    /// Time from cgroup membership sampling.
    #[default]
    HighPrecision,
    /// Time from the engine's start/finish timestamps.
    LowPrecision,
}

#[derive(Debug, Default, Clone, Copy)]
struct Samples {
    first_seen: Option<Instant>,
    last_seen: Option<Instant>,
    max_memory: u64,
}

impl Samples {
    fn elapsed(&self) -> Duration {
        match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }
}

/// Samples a container's cgroup while it runs.
///
/// The container counts as running while its cgroup holds at least two
/// pids (the init shim plus the program). Elapsed time is the span between
/// the first and last such sample.
pub struct ResourceMonitor {
    strategy: MonitorStrategy,
    engine: Arc<dyn ContainerEngine>,
    container: Container,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<Samples>>,
    samples: Samples,
}

impl ResourceMonitor {
    pub fn new(
        strategy: MonitorStrategy,
        engine: Arc<dyn ContainerEngine>,
        container: Container,
    ) -> Self {
        Self {
            strategy,
            engine,
            container,
            interval: SAMPLE_INTERVAL,
            cancel: CancellationToken::new(),
            task: None,
            samples: Samples::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Begin sampling. Calling it twice has no effect.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.task = Some(tokio::spawn(sample_loop(
            Arc::clone(&self.engine),
            self.container.clone(),
            self.cancel.clone(),
            self.interval,
        )));
    }

    /// Stop sampling. No sample is recorded after this returns.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(samples) => self.samples = samples,
            Err(e) => warn!(container = %self.container.id, error = %e, "monitor task failed"),
        }
    }

    /// Elapsed running time. Call after [`stop`](Self::stop).
    pub async fn used_time(&self) -> Duration {
        match self.strategy {
            MonitorStrategy::HighPrecision => self.samples.elapsed(),
            MonitorStrategy::LowPrecision => match self.engine.times(&self.container).await {
                Ok(times) => times.elapsed(),
                Err(e) => {
                    warn!(
                        container = %self.container.id,
                        error = %e,
                        "failed to read container times"
                    );
                    Duration::ZERO
                }
            },
        }
    }

    /// Peak memory in bytes. Call after [`stop`](Self::stop).
    pub fn max_used_memory(&self) -> u64 {
        self.samples.max_memory
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sample_loop(
    engine: Arc<dyn ContainerEngine>,
    container: Container,
    cancel: CancellationToken,
    interval: Duration,
) -> Samples {
    let mut samples = Samples::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Ok(procs) = engine.cgroup_procs(&container).await
                    && procs.len() >= 2
                {
                    let now = Instant::now();
                    samples.first_seen.get_or_insert(now);
                    samples.last_seen = Some(now);
                }
                if let Ok(memory) = engine.memory_current(&container).await {
                    samples.max_memory = samples.max_memory.max(memory);
                }
            }
        }
    }

    debug!(
        container = %container.id,
        elapsed_ms = samples.elapsed().as_millis() as u64,
        max_memory = samples.max_memory,
        "monitor stopped"
    );
    samples
}
