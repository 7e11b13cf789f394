use super::{Task, TaskOutcome};
use crate::error::{WatchtowerError, WatchtowerResult};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One poll of a looped task
#[async_trait]
pub trait LoopedStep<T>: Send + Sync {
    fn name(&self) -> String;

    async fn poll(&self, value: T, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<T>>;

    /// Latest persisted state of the value, read after every wait
    async fn refresh(&self, value: T, cancel: &CancellationToken) -> WatchtowerResult<T>;
}

/// Polls until the step passes or fails; a wait is never returned
pub struct Looped<S>(pub S);

#[async_trait]
impl<T, S> Task<T> for Looped<S>
where
    T: Send + 'static,
    S: LoopedStep<T>,
{
    fn name(&self) -> String {
        self.0.name()
    }

    async fn run(&self, value: T, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<T>> {
        let mut value = value;

        loop {
            match self.0.poll(value, cancel).await? {
                TaskOutcome::Wait(waiting, delay) => {
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(WatchtowerError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    debug!("{} polling again after {:?}", self.0.name(), delay);
                    value = self.0.refresh(waiting, cancel).await?;
                }
                done => return Ok(done),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Waits `waits` times, then passes; refresh bumps the value
    struct Countdown {
        waits: usize,
        polls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LoopedStep<u32> for Countdown {
        fn name(&self) -> String {
            "countdown".into()
        }

        async fn poll(&self, value: u32, _cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<u32>> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst);
            if polls < self.waits {
                Ok(TaskOutcome::Wait(value, Duration::from_secs(20)))
            } else {
                Ok(TaskOutcome::Passed(value))
            }
        }

        async fn refresh(&self, value: u32, _cancel: &CancellationToken) -> WatchtowerResult<u32> {
            Ok(value + 1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_then_refreshes() {
        let polls = Arc::new(AtomicUsize::new(0));
        let task = Looped(Countdown {
            waits: 3,
            polls: polls.clone(),
        });

        let started = tokio::time::Instant::now();
        let outcome = task.run(0, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Passed(3));
        assert_eq!(polls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let task = Looped(Countdown {
            waits: usize::MAX,
            polls: Arc::new(AtomicUsize::new(0)),
        });
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let err = task.run(0, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
