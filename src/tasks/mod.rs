//! Swap tasks and the fixed per-swap pipeline
//!
//! Every task is a looped poll over the persisted swap. Deadlines are
//! measured from the swap creation time.

mod find_additional_locks;
mod find_lock;
mod find_refund_or_redeem;

pub use find_additional_locks::FindAdditionalLocks;
pub use find_lock::FindLock;
pub use find_refund_or_redeem::FindRefundOrRedeem;

use crate::chain::{BlockchainService, ChainTransaction};
use crate::currency::Currencies;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;
use crate::repository::SharedRepository;
use crate::scheduler::{FailureAction, Looped, Scheduler, TaskOutcome};
use crate::swap::amount::is_required_amount_locked;
use crate::swap::{PartyStatus, PartyTransaction, PartyTransactionType, Swap, SwapParty};
use crate::wallet::SharedSettlement;

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const SWAP_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);
pub const CONFIRMATIONS_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub const REQUISITES_WAITING_INTERVAL: Duration = Duration::from_secs(10);
pub const LOCK_WAITING_INTERVAL: Duration = Duration::from_secs(10);
pub const CONFIRMATION_WAITING_INTERVAL: Duration = Duration::from_secs(20);

/// Collaborators shared by every swap task
#[derive(Clone)]
pub struct SwapTaskContext {
    pub repository: SharedRepository,
    pub service: Arc<BlockchainService>,
    pub currencies: Arc<Currencies>,
    pub wallet: Option<SharedSettlement>,
}

impl SwapTaskContext {
    async fn refresh(&self, swap: &Swap) -> WatchtowerResult<Swap> {
        self.repository
            .get_swap(swap.id)
            .await?
            .ok_or_else(|| WatchtowerError::NotFound {
                entity: "swap",
                id: swap.id.to_string(),
            })
    }

    fn timed_out(swap: &Swap, timeout: Duration) -> bool {
        swap.is_timed_out(Utc::now(), timeout)
    }

    /// Wait with `delay`, or fail once the swap is older than `timeout`
    fn wait_or_fail(swap: Swap, timeout: Duration, delay: Duration, stage: &str) -> TaskOutcome<Swap> {
        if Self::timed_out(&swap, timeout) {
            tracing::warn!("[swap {}] {} timed out", swap.id, stage);
            TaskOutcome::Failed(swap)
        } else {
            TaskOutcome::Wait(swap, delay)
        }
    }

    /// Link a newly found transaction, reusing the canonical record if any
    async fn add_transaction(
        &self,
        party_id: i64,
        tx: &ChainTransaction,
        kind: PartyTransactionType,
        amount: Decimal,
    ) -> WatchtowerResult<()> {
        let transaction_id = self
            .repository
            .get_transaction(&tx.tx_id, &tx.currency)
            .await?
            .map(|t| t.id)
            .unwrap_or(0);

        self.repository
            .add_party_transaction(&PartyTransaction {
                id: 0,
                party_id,
                transaction_id,
                transaction: tx.to_record(transaction_id),
                kind,
                amount: amount.to_string(),
            })
            .await?;

        metrics::record_transaction_discovered(&tx.currency, kind.as_str());
        Ok(())
    }

    /// Initiated when `locked` covers the requirement, else PartiallyInitiated
    async fn update_lock_status(
        &self,
        swap: &Swap,
        role: SwapParty,
        locked: Decimal,
    ) -> WatchtowerResult<TaskOutcome<Swap>> {
        let status = if is_required_amount_locked(swap, role, locked, &self.currencies)? {
            PartyStatus::Initiated
        } else {
            PartyStatus::PartiallyInitiated
        };

        let party = swap.party(role);
        if party.status != status {
            self.repository.update_party_status(party.id, status).await?;
            metrics::record_party_status(status.as_str());
            debug!("[swap {}] {} is {}", swap.id, role, status);
        }

        Ok(TaskOutcome::Passed(self.refresh(swap).await?))
    }
}

/// Builds swap tasks over one context
#[derive(Clone)]
pub struct SwapTaskFactory {
    context: SwapTaskContext,
}

impl SwapTaskFactory {
    pub fn new(context: SwapTaskContext) -> Self {
        Self { context }
    }

    pub fn find_lock(&self, role: SwapParty) -> Looped<FindLock> {
        Looped(FindLock::new(self.context.clone(), role))
    }

    pub fn find_additional_locks(&self, role: SwapParty) -> Looped<FindAdditionalLocks> {
        Looped(FindAdditionalLocks::new(self.context.clone(), role))
    }

    pub fn find_refund_or_redeem(&self, role: SwapParty) -> Looped<FindRefundOrRedeem> {
        Looped(FindRefundOrRedeem::new(self.context.clone(), role))
    }

    /// Initiator lock, acceptor lock, acceptor top-ups, then both
    /// refund-or-redeem checks. Failing to find either lock falls back to the
    /// initiator refund-or-redeem check and ends the run.
    pub fn pipeline(&self) -> Scheduler<Swap> {
        use SwapParty::{Acceptor, Initiator};

        let initiator_fallback = || Some(Scheduler::new().then(self.find_refund_or_redeem(Initiator)));

        Scheduler::new()
            .add_task(self.find_lock(Initiator), FailureAction::Return, initiator_fallback())
            .add_task(self.find_lock(Acceptor), FailureAction::Return, initiator_fallback())
            .add_task(self.find_additional_locks(Acceptor), FailureAction::Pass, None)
            .add_task(self.find_refund_or_redeem(Acceptor), FailureAction::Pass, None)
            .then(self.find_refund_or_redeem(Initiator))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::chain::service::fixtures::service;
    use crate::chain::MockBlockchainApi;
    use crate::currency::fixtures::currencies;

    pub fn context(repository: SharedRepository, eth: MockBlockchainApi) -> SwapTaskContext {
        SwapTaskContext {
            repository,
            service: Arc::new(service(vec![("ETH", eth)])),
            currencies: Arc::new(currencies()),
            wallet: None,
        }
    }
}
