use super::{
    SwapTaskContext, CONFIRMATIONS_TIMEOUT, CONFIRMATION_WAITING_INTERVAL, LOCK_WAITING_INTERVAL,
    SWAP_TIMEOUT,
};
use crate::error::WatchtowerResult;
use crate::scheduler::{LoopedStep, TaskOutcome};
use crate::searcher::htlc_query;
use crate::swap::amount::{confirmed_locked_amount, required_amount};
use crate::swap::{PartyStatus, PartyTransaction, PartyTransactionType, Swap, SwapParty, TransactionStatus};

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tops up a partially locked party with additional locks until the
/// confirmed total covers the requirement
pub struct FindAdditionalLocks {
    context: SwapTaskContext,
    role: SwapParty,
}

impl FindAdditionalLocks {
    pub fn new(context: SwapTaskContext, role: SwapParty) -> Self {
        Self { context, role }
    }
}

#[async_trait]
impl LoopedStep<Swap> for FindAdditionalLocks {
    fn name(&self) -> String {
        format!("find_additional_locks({})", self.role)
    }

    async fn poll(&self, swap: Swap, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<Swap>> {
        let currencies = &self.context.currencies;
        if currencies.is_bitcoin_based(swap.sold_currency(self.role))? {
            return Ok(TaskOutcome::Passed(swap));
        }

        let party = swap.party(self.role);
        let required = required_amount(&swap, self.role, currencies)?;
        let locked = confirmed_locked_amount(&swap, self.role);

        if locked >= required {
            if party.status == PartyStatus::PartiallyInitiated {
                self.context
                    .repository
                    .update_party_status(party.id, PartyStatus::Initiated)
                    .await?;
                crate::metrics::record_party_status(PartyStatus::Initiated.as_str());
                debug!("[swap {}] {} topped up to {}", swap.id, self.role, locked);
                return Ok(TaskOutcome::Passed(self.context.refresh(&swap).await?));
            }
            return Ok(TaskOutcome::Passed(swap));
        }

        let query = htlc_query(&swap, self.role, currencies)?;
        let mut changed = false;

        // refresh recorded, still pending top-ups
        let pending: Vec<PartyTransaction> = party
            .transactions_of(&[PartyTransactionType::AdditionalLock])
            .filter(|t| t.transaction.status == TransactionStatus::Pending)
            .cloned()
            .collect();

        for party_tx in &pending {
            let tx = self
                .context
                .service
                .get_transaction(&query.currency, &party_tx.transaction.tx_id, cancel)
                .await?;

            if let Some(tx) = tx.filter(|tx| tx.status != TransactionStatus::Pending) {
                self.context
                    .repository
                    .update_party_transaction(&PartyTransaction {
                        transaction: tx.to_record(party_tx.transaction_id),
                        amount: tx.amount(&query).to_string(),
                        ..party_tx.clone()
                    })
                    .await?;
                changed = true;
            }
        }

        // look for top-ups not recorded yet
        let found = self.context.service.find_additional_locks(&query, cancel).await?;
        for tx in found.iter().filter(|tx| party.find_transaction(&tx.tx_id).is_none()) {
            self.context
                .add_transaction(party.id, tx, PartyTransactionType::AdditionalLock, tx.amount(&query))
                .await?;
            debug!("[swap {}] {} additional lock {} found", swap.id, self.role, tx.tx_id);
            changed = true;
        }

        if changed {
            return Ok(TaskOutcome::Wait(swap, Duration::ZERO));
        }

        Ok(if pending.is_empty() {
            SwapTaskContext::wait_or_fail(swap, SWAP_TIMEOUT, LOCK_WAITING_INTERVAL, "additional lock discovery")
        } else {
            SwapTaskContext::wait_or_fail(
                swap,
                CONFIRMATIONS_TIMEOUT,
                CONFIRMATION_WAITING_INTERVAL,
                "additional lock confirmation",
            )
        })
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
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_bitcoin_side_passes() {
        let (repository, swap) = stored_swap(Utc::now()).await;
        let task = FindAdditionalLocks::new(context(repository, MockBlockchainApi::new()), SwapParty::Acceptor);

        let outcome = task.poll(swap, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Passed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_up_flips_to_initiated() {
        let (repository, swap) = stored_swap(Utc::now()).await;
        let context = context(repository.clone(), {
            let mut eth = MockBlockchainApi::new();
            let mut searches = 0;
            eth.expect_find_additional_locks().returning(move |_, _| {
                searches += 1;
                if searches == 1 {
                    Ok(vec![])
                } else {
                    Ok(vec![eth_lock("0xadd", 400_000_000, true)])
                }
            });
            eth
        });

        let lock = eth_lock("0xlock", 600_000_000, true);
        context
            .add_transaction(swap.initiator.id, &lock, PartyTransactionType::Lock, Decimal::from(600_000_000))
            .await
            .unwrap();
        repository
            .update_party_status(swap.initiator.id, PartyStatus::PartiallyInitiated)
            .await
            .unwrap();
        let swap = repository.get_swap(1).await.unwrap().unwrap();

        let task = Looped(FindAdditionalLocks::new(context, SwapParty::Initiator));
        let outcome = task.run(swap, &CancellationToken::new()).await.unwrap();

        let TaskOutcome::Passed(swap) = outcome else {
            panic!("top-up not accepted");
        };
        assert_eq!(swap.initiator.status, PartyStatus::Initiated);
        assert_eq!(swap.initiator.transactions.len(), 2);
    }
}
