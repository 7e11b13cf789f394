use super::{join_all, next_active_swaps, poll_upstream, sleep_or_cancel, QueueDepths, UpstreamSource};
use crate::config::{TrackerConfig, TrackerMode};
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;
use crate::repository::SharedRepository;
use crate::scheduler::RunResult;
use crate::swap::Swap;
use crate::tasks::SwapTaskFactory;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_PARKED_SWAPS: usize = 10_000;

/// Drives every active swap through the task pipeline, at most `workers`
/// pipelines at a time
pub struct Guard {
    repository: SharedRepository,
    factory: SwapTaskFactory,
    upstream: Option<UpstreamSource>,
    config: TrackerConfig,
    permits: Arc<Semaphore>,
    running: DashMap<i64, ()>,
    failed: DashMap<i64, Swap>,
    max_parked: usize,
}

impl Guard {
    pub fn new(
        repository: SharedRepository,
        factory: SwapTaskFactory,
        upstream: Option<UpstreamSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            repository,
            factory,
            upstream,
            permits: Arc::new(Semaphore::new(config.workers)),
            config,
            running: DashMap::new(),
            failed: DashMap::new(),
            max_parked: MAX_PARKED_SWAPS,
        }
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            active: self.running.len(),
            waiting: 0,
            failed: self.failed.len(),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> WatchtowerResult<()> {
        info!("Guard started with {} concurrent pipelines", self.config.workers);

        let mut tasks = JoinSet::new();

        if self.upstream.is_some() {
            let guard = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let Some(upstream) = &guard.upstream else {
                    return Ok(());
                };
                let interval = Duration::from_secs(guard.config.upstream_poll_interval_secs);
                poll_upstream(upstream, guard.repository.as_ref(), interval, &cancel).await
            });
        }

        {
            let guard = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { guard.poll_database(&cancel).await });
        }

        join_all("Guard", tasks).await;
        Ok(())
    }

    async fn poll_database(self: Arc<Self>, cancel: &CancellationToken) -> WatchtowerResult<()> {
        let interval = Duration::from_secs(self.config.db_poll_interval_secs);
        let mut cursor = 0;

        loop {
            match next_active_swaps(self.repository.as_ref(), &mut cursor).await {
                Ok(swaps) => {
                    for swap in swaps {
                        if self.running.contains_key(&swap.id) {
                            continue;
                        }
                        self.running.insert(swap.id, ());
                        metrics::set_queue_depth("active", self.running.len());

                        let guard = self.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move { guard.drive(swap, &cancel).await });
                    }
                }
                Err(e) => warn!("Failed to load active swaps: {}", e),
            }

            sleep_or_cancel(interval, cancel).await?;
        }
    }

    /// Run the pipeline for one swap once a permit is free
    async fn drive(&self, swap: Swap, cancel: &CancellationToken) {
        let id = swap.id;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WatchtowerError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|e| WatchtowerError::Internal(e.to_string())),
        };

        let result = match permit {
            Ok(_permit) => {
                let started = Instant::now();
                let result = self.factory.pipeline().run(swap, cancel).await;
                metrics::record_swap_pass(TrackerMode::Guard.as_str(), started.elapsed().as_secs_f64());
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(RunResult::Completed(_)) => {
                info!("[swap {}] pipeline completed", id);
                metrics::record_swap_resolved("completed");
            }
            Ok(RunResult::Aborted { task, value }) => {
                warn!("[swap {}] pipeline aborted at {}", id, task);
                metrics::record_swap_resolved("aborted");
                self.park(value);
            }
            Err(e) if e.is_cancelled() => debug!("[swap {}] pipeline cancelled", id),
            Err(e) => error!("[swap {}] error while handling swap: {}", id, e),
        }

        self.running.remove(&id);
        metrics::set_queue_depth("active", self.running.len());
    }

    /// Keep an aborted swap for reporting, dropping the oldest beyond `max_parked`
    fn park(&self, swap: Swap) {
        self.failed.insert(swap.id, swap);
        while self.failed.len() > self.max_parked {
            let Some(oldest) = self.failed.iter().map(|entry| *entry.key()).min() else {
                break;
            };
            self.failed.remove(&oldest);
        }
        metrics::set_queue_depth("failed", self.failed.len());
    }
}
