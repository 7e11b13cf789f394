use super::{
    SwapTaskContext, CONFIRMATIONS_TIMEOUT, CONFIRMATION_WAITING_INTERVAL, LOCK_WAITING_INTERVAL,
    REQUISITES_WAITING_INTERVAL, SWAP_TIMEOUT,
};
use crate::error::WatchtowerResult;
use crate::scheduler::{LoopedStep, TaskOutcome};
use crate::searcher::htlc_query;
use crate::swap::{
    PartyStatus, PartyTransaction, PartyTransactionType, Swap, SwapParty, TransactionStatus,
};

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Waits for the party's requisites, then finds its lock and waits for the
/// lock to confirm
pub struct FindLock {
    context: SwapTaskContext,
    role: SwapParty,
}

impl FindLock {
    pub fn new(context: SwapTaskContext, role: SwapParty) -> Self {
        Self { context, role }
    }

    async fn find_lock(&self, swap: Swap, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<Swap>> {
        let query = htlc_query(&swap, self.role, &self.context.currencies)?;

        let Some(lock) = self.context.service.find_lock(&query, cancel).await? else {
            return Ok(SwapTaskContext::wait_or_fail(
                swap,
                SWAP_TIMEOUT,
                LOCK_WAITING_INTERVAL,
                "lock discovery",
            ));
        };

        let locked = lock.amount(&query);
        self.context
            .add_transaction(
                swap.party(self.role).id,
                &lock,
                PartyTransactionType::Lock,
                locked,
            )
            .await?;
        debug!("[swap {}] {} lock {} found", swap.id, self.role, lock.tx_id);

        if !lock.is_confirmed() {
            return Ok(TaskOutcome::Wait(swap, Duration::ZERO));
        }

        self.context.update_lock_status(&swap, self.role, locked).await
    }

    async fn wait_for_confirmations(
        &self,
        swap: Swap,
        locks: Vec<PartyTransaction>,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<TaskOutcome<Swap>> {
        if locks.iter().any(|t| t.transaction.is_confirmed()) {
            return Ok(TaskOutcome::Passed(swap));
        }

        let query = htlc_query(&swap, self.role, &self.context.currencies)?;

        for party_tx in locks {
            let lock = self
                .context
                .service
                .get_transaction(&query.currency, &party_tx.transaction.tx_id, cancel)
                .await?;

            let Some(lock) = lock.filter(|tx| tx.is_confirmed()) else {
                continue;
            };

            let locked = lock.amount(&query);
            self.context
                .repository
                .update_party_transaction(&PartyTransaction {
                    transaction: lock.to_record(party_tx.transaction_id),
                    amount: locked.to_string(),
                    ..party_tx
                })
                .await?;
            debug!("[swap {}] {} lock {} confirmed", swap.id, self.role, lock.tx_id);

            return self.context.update_lock_status(&swap, self.role, locked).await;
        }

        Ok(SwapTaskContext::wait_or_fail(
            swap,
            CONFIRMATIONS_TIMEOUT,
            CONFIRMATION_WAITING_INTERVAL,
            "lock confirmation",
        ))
    }
}

#[async_trait]
impl LoopedStep<Swap> for FindLock {
    fn name(&self) -> String {
        format!("find_lock({})", self.role)
    }

    async fn poll(&self, swap: Swap, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<Swap>> {
        let party = swap.party(self.role);
        let counter_party = swap.counter_party(self.role);

        let missing_requisites = swap.secret_hash.is_none()
            || party.requisites.is_none()
            || counter_party.requisites.is_none();

        if party.status == PartyStatus::Created && missing_requisites {
            return Ok(SwapTaskContext::wait_or_fail(
                swap,
                SWAP_TIMEOUT,
                REQUISITES_WAITING_INTERVAL,
                "requisites",
            ));
        }

        let locks: Vec<PartyTransaction> = party
            .transactions_of(&[PartyTransactionType::Lock])
            .filter(|t| t.transaction.status != TransactionStatus::Canceled)
            .cloned()
            .collect();

        let sold = swap.sold_currency(self.role);
        if locks.is_empty() && self.context.currencies.is_bitcoin_based(sold)? {
            // placed by an external request, never discovered on chain
            return Ok(SwapTaskContext::wait_or_fail(
                swap,
                SWAP_TIMEOUT,
                LOCK_WAITING_INTERVAL,
                "lock discovery",
            ));
        }

        if locks.is_empty() {
            self.find_lock(swap, cancel).await
        } else {
            self.wait_for_confirmations(swap, locks, cancel).await
        }
    }

    async fn refresh(&self, swap: Swap, _cancel: &CancellationToken) -> WatchtowerResult<Swap> {
        self.context.refresh(&swap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockBlockchainApi;
    use crate::repository::DataRepository;
    use crate::scheduler::{Looped, Task};
    use crate::searcher::fixtures::{eth_lock, stored_swap};
    use crate::tasks::fixtures::context;
    use chrono::{Duration as Age, Utc};

    #[tokio::test]
    async fn test_waits_until_swap_timeout() {
        let mut eth = MockBlockchainApi::new();
        eth.expect_find_lock().returning(|_, _| Ok(None));
        let cancel = CancellationToken::new();

        let (repository, young) = stored_swap(Utc::now() - Age::hours(12) + Age::minutes(1)).await;
        let task = FindLock::new(context(repository, eth), SwapParty::Initiator);

        let outcome = task.poll(young.clone(), &cancel).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Wait(young.clone(), LOCK_WAITING_INTERVAL));

        let mut old = young;
        old.timestamp = Utc::now() - Age::hours(12);
        assert!(matches!(
            task.poll(old, &cancel).await.unwrap(),
            TaskOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_requisites_wait() {
        let (repository, mut swap) = stored_swap(Utc::now()).await;
        swap.initiator.status = PartyStatus::Created;
        swap.acceptor.requisites = None;

        let task = FindLock::new(context(repository, MockBlockchainApi::new()), SwapParty::Initiator);
        let outcome = task.poll(swap, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Wait(_, d) if d == REQUISITES_WAITING_INTERVAL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_lock_confirms_in_loop() {
        let (repository, swap) = stored_swap(Utc::now()).await;

        let mut eth = MockBlockchainApi::new();
        eth.expect_find_lock()
            .times(1)
            .returning(|_, _| Ok(Some(eth_lock("0xlock", 1_000_000_000, false))));
        let mut polls = 0;
        eth.expect_get_transaction().returning(move |_, _| {
            polls += 1;
            Ok(Some(eth_lock("0xlock", 1_000_000_000, polls > 1)))
        });

        let task = Looped(FindLock::new(context(repository.clone(), eth), SwapParty::Initiator));
        let outcome = task.run(swap, &CancellationToken::new()).await.unwrap();

        let TaskOutcome::Passed(swap) = outcome else {
            panic!("lock not confirmed");
        };
        assert_eq!(swap.initiator.status, PartyStatus::Initiated);

        let stored = repository.get_swap(1).await.unwrap().unwrap();
        assert_eq!(stored.initiator.transactions.len(), 1);
        assert!(stored.initiator.transactions[0].transaction.is_confirmed());
    }

    #[tokio::test]
    async fn test_bitcoin_lock_must_be_recorded() {
        let (repository, swap) = stored_swap(Utc::now()).await;

        let task = FindLock::new(context(repository, MockBlockchainApi::new()), SwapParty::Acceptor);
        let outcome = task.poll(swap, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Wait(_, d) if d == LOCK_WAITING_INTERVAL));
    }
}
