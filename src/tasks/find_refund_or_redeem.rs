use super::{SwapTaskContext, CONFIRMATION_WAITING_INTERVAL, SWAP_TIMEOUT};
use crate::chain::{ChainTransaction, HtlcQuery};
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;
use crate::scheduler::{LoopedStep, TaskOutcome};
use crate::searcher::htlc_query;
use crate::swap::{PartyStatus, PartyTransactionType, Swap, SwapParty, TransactionStatus};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolves the party's lock: redeemed by the counterpart, or refunded by
/// the party once its lock time has passed
pub struct FindRefundOrRedeem {
    context: SwapTaskContext,
    role: SwapParty,
}

impl FindRefundOrRedeem {
    pub fn new(context: SwapTaskContext, role: SwapParty) -> Self {
        Self { context, role }
    }

    /// Track the spend of kind `kind` held by `holder`; passes once a
    /// confirmed spend is recorded and the party statuses reflect it
    async fn find_tx(
        &self,
        swap: Swap,
        kind: PartyTransactionType,
        holder: SwapParty,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<TaskOutcome<Swap>> {
        let party = swap.party(holder);
        let recorded = party
            .transactions_of(&[kind])
            .find(|t| t.transaction.status != TransactionStatus::Canceled)
            .cloned();

        if recorded.as_ref().is_some_and(|t| t.transaction.is_confirmed()) {
            return Ok(TaskOutcome::Passed(swap));
        }

        let service = &self.context.service;
        let found = match kind {
            PartyTransactionType::Redeem => service.find_redeem(query, cancel).await?,
            _ => service.find_refund(query, cancel).await?,
        };

        if let Some(tx) = &found {
            if kind == PartyTransactionType::Redeem && self.role == SwapParty::Acceptor {
                if let Some(wallet) = &self.context.wallet {
                    if let Err(e) = wallet.redeem(&swap, tx).await {
                        warn!("[swap {}] redeem submission failed: {}", swap.id, e);
                    }
                }
            }
        }

        let tx = match (recorded, found) {
            (Some(recorded), Some(tx)) if recorded.transaction.tx_id.eq_ignore_ascii_case(&tx.tx_id) => {
                if !tx.is_confirmed() {
                    return Ok(TaskOutcome::Wait(swap, CONFIRMATION_WAITING_INTERVAL));
                }
                self.context
                    .repository
                    .update_transaction(&tx.to_record(recorded.transaction_id))
                    .await?;
                tx
            }
            (recorded, found) => {
                if let Some(stale) = recorded {
                    debug!("[swap {}] dropping stale {} {}", swap.id, kind, stale.transaction.tx_id);
                    self.context.repository.remove_party_transaction(stale.id).await?;
                    self.context.repository.remove_transaction(stale.transaction_id).await?;
                }

                let Some(tx) = found else {
                    return Ok(TaskOutcome::Wait(swap, CONFIRMATION_WAITING_INTERVAL));
                };

                self.context
                    .add_transaction(party.id, &tx, kind, Decimal::ZERO)
                    .await?;

                if !tx.is_confirmed() {
                    return Ok(TaskOutcome::Wait(swap, CONFIRMATION_WAITING_INTERVAL));
                }
                tx
            }
        };

        self.settle(&swap, kind, holder).await?;

        if kind == PartyTransactionType::Redeem {
            self.save_secret(&swap, &tx, query).await?;
        }

        Ok(TaskOutcome::Passed(self.context.refresh(&swap).await?))
    }

    /// Redeemed or Refunded, or Jackpot when the holder already has the
    /// other outcome; the counterpart of a jackpot is Lost
    async fn settle(&self, swap: &Swap, kind: PartyTransactionType, holder: SwapParty) -> WatchtowerResult<()> {
        let (status, alternate) = match kind {
            PartyTransactionType::Redeem => (PartyStatus::Redeemed, PartyStatus::Refunded),
            _ => (PartyStatus::Refunded, PartyStatus::Redeemed),
        };

        let party = swap.party(holder);
        let counter_party = swap.counter_party(holder);

        let status = if party.status == alternate || party.status == PartyStatus::Jackpot {
            PartyStatus::Jackpot
        } else {
            status
        };

        let mut updates = vec![(party.id, status)];
        if status == PartyStatus::Jackpot && counter_party.status != PartyStatus::Lost {
            updates.push((counter_party.id, PartyStatus::Lost));
        }

        if !self.context.repository.update_party_statuses(&updates).await? {
            return Err(WatchtowerError::NotFound {
                entity: "party",
                id: updates
                    .iter()
                    .map(|(id, _)| id.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }

        for (_, status) in &updates {
            metrics::record_party_status(status.as_str());
        }
        info!("[swap {}] {} is {}", swap.id, holder, status);
        Ok(())
    }

    async fn save_secret(&self, swap: &Swap, tx: &ChainTransaction, query: &HtlcQuery) -> WatchtowerResult<()> {
        match tx.secret(&query.secret_hash, query.secret_size) {
            Some(secret) => {
                self.context.repository.add_secret(swap.id, &secret).await?;
            }
            None => warn!("[swap {}] redeem {} reveals no matching secret", swap.id, tx.tx_id),
        }
        Ok(())
    }
}

#[async_trait]
impl LoopedStep<Swap> for FindRefundOrRedeem {
    fn name(&self) -> String {
        format!("find_refund_or_redeem({})", self.role)
    }

    async fn poll(&self, swap: Swap, cancel: &CancellationToken) -> WatchtowerResult<TaskOutcome<Swap>> {
        let has_lock = swap
            .party(self.role)
            .transactions_of(&[PartyTransactionType::Lock])
            .next()
            .is_some();

        if !has_lock {
            warn!("[swap {}] {} has no lock to resolve", swap.id, self.role);
            return Ok(TaskOutcome::Failed(swap));
        }

        let query = htlc_query(&swap, self.role, &self.context.currencies)?;

        let outcome = self
            .find_tx(swap, PartyTransactionType::Redeem, self.role.counter(), &query, cancel)
            .await?;
        if !outcome.is_wait() {
            return Ok(outcome);
        }
        let swap = outcome.into_value();

        if swap.refund_time(self.role) > Utc::now() {
            return Ok(TaskOutcome::Wait(swap, CONFIRMATION_WAITING_INTERVAL));
        }

        if self.role == SwapParty::Acceptor {
            if let Some(wallet) = &self.context.wallet {
                if let Err(e) = wallet.refund(&swap).await {
                    warn!("[swap {}] refund submission failed: {}", swap.id, e);
                }
            }
        }

        let outcome = self
            .find_tx(swap, PartyTransactionType::Refund, self.role, &query, cancel)
            .await?;
        if !outcome.is_wait() {
            return Ok(outcome);
        }

        Ok(match outcome {
            TaskOutcome::Wait(swap, delay) => {
                if SwapTaskContext::timed_out(&swap, SWAP_TIMEOUT) {
                    warn!("[swap {}] refund timed out", swap.id);
                    TaskOutcome::Failed(swap)
                } else {
                    TaskOutcome::Wait(swap, delay)
                }
            }
            done => done,
        })
    }

    async fn refresh(&self, swap: Swap, _cancel: &CancellationToken) -> WatchtowerResult<Swap> {
        self.context.refresh(&swap).await
    }
}
