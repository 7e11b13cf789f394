//! Tracker - dispatches active swaps to the resolution engine
//!
//! Two modes share the pollers and storage:
//! - `tracker`: active / waiting / failed queues drained by a worker pool,
//!   each dequeue runs one searcher pass over the swap
//! - `guard`: every active swap is driven through the task pipeline on its
//!   own task
//!
//! A swap is only re-enqueued after its previous handling has finished, so
//! no two workers ever touch the same swap.

mod guard;
mod queue;
mod upstream;

pub use guard::Guard;
pub use queue::SwapQueue;
pub use upstream::{import_swaps, UpstreamSource};

use crate::config::{TrackerConfig, TrackerMode};
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;
use crate::repository::{DataRepository, SharedRepository};
use crate::searcher::TransactionSearcher;
use crate::swap::{Swap, SwapParty, SwapQuery};
use crate::tasks::SWAP_TIMEOUT;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const IDLE_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Swap counts per dispatch stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub active: usize,
    pub waiting: usize,
    pub failed: usize,
}

/// The configured dispatch mode
#[derive(Clone)]
pub enum Dispatcher {
    Tracker(Arc<Tracker>),
    Guard(Arc<Guard>),
}

impl Dispatcher {
    pub fn mode(&self) -> TrackerMode {
        match self {
            Dispatcher::Tracker(_) => TrackerMode::Tracker,
            Dispatcher::Guard(_) => TrackerMode::Guard,
        }
    }

    pub fn depths(&self) -> QueueDepths {
        match self {
            Dispatcher::Tracker(tracker) => tracker.depths(),
            Dispatcher::Guard(guard) => guard.depths(),
        }
    }

    /// Runs until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> WatchtowerResult<()> {
        match self {
            Dispatcher::Tracker(tracker) => tracker.clone().run(cancel).await,
            Dispatcher::Guard(guard) => guard.clone().run(cancel).await,
        }
    }
}

/// Sleep unless cancelled first
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> WatchtowerResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WatchtowerError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Active swaps above `cursor`, advancing the cursor to the highest id seen
pub(crate) async fn next_active_swaps(
    repository: &dyn DataRepository,
    cursor: &mut i64,
) -> WatchtowerResult<Vec<Swap>> {
    let swaps = repository.get_swaps(&SwapQuery::active_since(*cursor)).await?;
    if let Some(last) = swaps.iter().map(|s| s.id).max() {
        *cursor = last;
    }
    Ok(swaps)
}

/// Pull the upstream feed into storage on a fixed interval
pub(crate) async fn poll_upstream(
    upstream: &UpstreamSource,
    repository: &dyn DataRepository,
    interval: Duration,
    cancel: &CancellationToken,
) -> WatchtowerResult<()> {
    let mut cursor = 0;
    loop {
        match upstream.fetch_active(cancel).await {
            Ok(swaps) => match import_swaps(repository, swaps, cursor).await {
                Ok((next, _)) => cursor = next,
                Err(e) => warn!("Failed to import upstream swaps: {}", e),
            },
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => warn!("Failed to fetch upstream swaps: {}", e),
        }

        sleep_or_cancel(interval, cancel).await?;
    }
}

/// Collect spawned loops; cancellation is the normal way out
pub(crate) async fn join_all(name: &str, mut tasks: JoinSet<WatchtowerResult<()>>) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => error!("{} loop failed: {}", name, e),
            Err(e) => error!("{} loop panicked: {}", name, e),
        }
    }
    info!("{} stopped", name);
}

/// Queue-based dispatcher running one searcher pass per dequeue
pub struct Tracker {
    repository: SharedRepository,
    searcher: TransactionSearcher,
    upstream: Option<UpstreamSource>,
    config: TrackerConfig,
    active: SwapQueue<Swap>,
    waiting: SwapQueue<(Swap, Instant)>,
    failed: DashMap<i64, Swap>,
}

impl Tracker {
    pub fn new(
        repository: SharedRepository,
        searcher: TransactionSearcher,
        upstream: Option<UpstreamSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            repository,
            searcher,
            upstream,
            config,
            active: SwapQueue::new("active"),
            waiting: SwapQueue::new("waiting"),
            failed: DashMap::new(),
        }
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            active: self.active.len(),
            waiting: self.waiting.len(),
            failed: self.failed.len(),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> WatchtowerResult<()> {
        info!("Tracker started with {} workers", self.config.workers);

        let mut tasks = JoinSet::new();

        for worker in 0..self.config.workers {
            let tracker = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                debug!("Tracker worker {} started", worker);
                tracker.handle_active_swaps(&cancel).await
            });
        }

        {
            let tracker = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { tracker.handle_waiting_swaps(&cancel).await });
        }

        {
            let tracker = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { tracker.poll_database(&cancel).await });
        }

        if self.upstream.is_some() {
            let tracker = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let Some(upstream) = &tracker.upstream else {
                    return Ok(());
                };
                let interval = Duration::from_secs(tracker.config.upstream_poll_interval_secs);
                poll_upstream(upstream, tracker.repository.as_ref(), interval, &cancel).await
            });
        }

        join_all("Tracker", tasks).await;
        Ok(())
    }

    /// Not initiated and past the swap timeout
    fn is_abandoned(swap: &Swap) -> bool {
        !swap.is_initiated() && swap.is_timed_out(Utc::now(), SWAP_TIMEOUT)
    }

    fn park(&self, swap: Swap) {
        debug!("[swap {}] abandoned, will not wait any longer", swap.id);
        metrics::record_swap_resolved("abandoned");
        self.failed.insert(swap.id, swap);
        metrics::set_queue_depth("failed", self.failed.len());
    }

    async fn handle_active_swaps(&self, cancel: &CancellationToken) -> WatchtowerResult<()> {
        loop {
            let swap = self.active.take(cancel).await?;

            if Self::is_abandoned(&swap) {
                self.park(swap);
                continue;
            }

            let started = Instant::now();
            let completed = match self.handle_swap(&swap, cancel).await {
                Ok(completed) => completed,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!("[swap {}] error while handling swap: {}", swap.id, e);
                    false
                }
            };
            metrics::record_swap_pass(TrackerMode::Tracker.as_str(), started.elapsed().as_secs_f64());

            if completed {
                info!("[swap {}] completed", swap.id);
                metrics::record_swap_resolved("completed");
            } else if swap.is_timed_out(Utc::now(), SWAP_TIMEOUT) {
                self.park(swap);
            } else {
                self.waiting.push((swap, Instant::now()));
            }
        }
    }

    async fn fresh(&self, id: i64) -> WatchtowerResult<Swap> {
        self.repository
            .get_swap(id)
            .await?
            .ok_or_else(|| WatchtowerError::NotFound {
                entity: "swap",
                id: id.to_string(),
            })
    }

    /// One searcher pass; true once the swap reached a terminal combination
    pub async fn handle_swap(&self, swap: &Swap, cancel: &CancellationToken) -> WatchtowerResult<bool> {
        use SwapParty::{Acceptor, Initiator};

        let searcher = &self.searcher;

        if !searcher.find_lock_transactions(swap, Initiator, cancel).await? {
            return Ok(false);
        }

        let swap = self.fresh(swap.id).await?;
        if !searcher.find_lock_transactions(&swap, Acceptor, cancel).await? {
            let swap = self.fresh(swap.id).await?;
            return searcher.find_refund_transactions(&swap, Initiator, cancel).await;
        }

        let swap = self.fresh(swap.id).await?;
        let redeemed_by_initiator = searcher.find_redeem_transactions(&swap, Initiator, cancel).await?;

        let refunded_by_acceptor = !redeemed_by_initiator && {
            let swap = self.fresh(swap.id).await?;
            searcher.find_refund_transactions(&swap, Acceptor, cancel).await?
        };

        let swap = self.fresh(swap.id).await?;
        let redeemed_by_acceptor = searcher.find_redeem_transactions(&swap, Acceptor, cancel).await?;

        let refunded_by_initiator = !redeemed_by_acceptor && {
            let swap = self.fresh(swap.id).await?;
            searcher.find_refund_transactions(&swap, Initiator, cancel).await?
        };

        Ok((redeemed_by_initiator && redeemed_by_acceptor)
            || (refunded_by_initiator && refunded_by_acceptor)
            || (redeemed_by_initiator && refunded_by_initiator)
            || (redeemed_by_acceptor && refunded_by_acceptor))
    }

    /// Promote due swaps back to active with their latest stored state
    async fn handle_waiting_swaps(&self, cancel: &CancellationToken) -> WatchtowerResult<()> {
        let interval = Duration::from_secs(self.config.waiting_interval_secs);

        loop {
            let Some(since) = self.waiting.peek(|(_, since)| *since) else {
                sleep_or_cancel(IDLE_DRAIN_INTERVAL, cancel).await?;
                continue;
            };

            let elapsed = since.elapsed();
            if elapsed < interval {
                sleep_or_cancel(interval - elapsed, cancel).await?;
                continue;
            }

            let Some((swap, _)) = self.waiting.try_pop() else {
                continue;
            };

            match self.repository.get_swap(swap.id).await {
                Ok(Some(fresh)) => self.active.push(fresh),
                Ok(None) => warn!("[swap {}] no longer stored, dropping", swap.id),
                Err(e) => {
                    warn!("[swap {}] failed to reload waiting swap: {}", swap.id, e);
                    self.waiting.push((swap, Instant::now()));
                }
            }
        }
    }

    async fn poll_database(&self, cancel: &CancellationToken) -> WatchtowerResult<()> {
        let interval = Duration::from_secs(self.config.db_poll_interval_secs);
        let mut cursor = 0;

        loop {
            match next_active_swaps(self.repository.as_ref(), &mut cursor).await {
                Ok(swaps) => {
                    if !swaps.is_empty() {
                        info!("{} new active swaps found in db", swaps.len());
                    }
                    for swap in swaps {
                        self.active.push(swap);
                    }
                }
                Err(e) => warn!("Failed to load active swaps: {}", e),
            }

            sleep_or_cancel(interval, cancel).await?;
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn tracker_config(workers: usize) -> TrackerConfig {
        TrackerConfig {
            instance_id: "watchtower-test".into(),
            mode: TrackerMode::Tracker,
            workers,
            db_poll_interval_secs: 10,
            upstream_poll_interval_secs: 10,
            waiting_interval_secs: 20,
            health_check_interval_secs: 30,
        }
    }
}
