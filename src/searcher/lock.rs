use super::{htlc_query, TransactionSearcher};
use crate::chain::{ChainTransaction, HtlcQuery};
use crate::error::WatchtowerResult;
use crate::swap::amount::{confirmed_locked_amount, is_required_amount_locked};
use crate::swap::{PartyStatus, PartyTransactionType, Swap, SwapParty};

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl TransactionSearcher {
    /// True once confirmed lock evidence exists for `role`. The party status
    /// becomes Initiated when the confirmed amount covers the requirement and
    /// PartiallyInitiated otherwise.
    pub async fn find_lock_transactions(
        &self,
        swap: &Swap,
        role: SwapParty,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<bool> {
        if self.is_locked(swap, role)? {
            return Ok(true);
        }

        let party = swap.party(role);
        let counter_party = swap.counter_party(role);

        if party.status == PartyStatus::Created || counter_party.status == PartyStatus::Created {
            debug!("[swap {}] waiting for requisites", swap.id);
            return Ok(false);
        }

        let query = htlc_query(swap, role, &self.currencies)?;
        debug!(
            "[swap {}] searching {} locks on {} (secret hash {})",
            swap.id, role, query.currency, query.secret_hash
        );

        let locks = if self.currencies.is_bitcoin_based(&query.currency)? {
            self.verify_recorded_locks(swap, role, &query, cancel).await?
        } else {
            self.find_locks(&query, cancel).await?
        };

        if locks.is_empty() {
            debug!("[swap {}] no {} lock found yet", swap.id, role);
            return Ok(false);
        }

        self.upsert_transactions(party, &locks, &query).await?;

        let confirmed: Vec<&ChainTransaction> = locks
            .iter()
            .map(|(tx, _)| tx)
            .filter(|tx| tx.is_confirmed())
            .collect();

        if confirmed.is_empty() {
            return Ok(false);
        }

        let locked: Decimal = confirmed.iter().map(|tx| tx.amount(&query)).sum();
        let status = if is_required_amount_locked(swap, role, locked, &self.currencies)? {
            PartyStatus::Initiated
        } else {
            PartyStatus::PartiallyInitiated
        };

        // final statuses are owned by the redeem and refund searches
        if party.status != status && !party.status.is_final() {
            self.repository.update_party_status(party.id, status).await?;
            crate::metrics::record_party_status(status.as_str());
            debug!("[swap {}] {} is {} ({} locked)", swap.id, role, status, locked);
        }

        Ok(true)
    }

    /// Recorded confirmed locks already cover the requirement
    fn is_locked(&self, swap: &Swap, role: SwapParty) -> WatchtowerResult<bool> {
        let party = swap.party(role);
        let has_confirmed = party
            .transactions_of(&PartyTransactionType::LOCKS)
            .any(|t| t.transaction.is_confirmed());

        Ok(has_confirmed
            && party.status >= PartyStatus::Initiated
            && is_required_amount_locked(
                swap,
                role,
                confirmed_locked_amount(swap, role),
                &self.currencies,
            )?)
    }

    /// Lock plus additional locks; additional locks are only looked for once
    /// the lock itself exists
    async fn find_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<(ChainTransaction, PartyTransactionType)>> {
        let locks = self.service.find_locks(query, cancel).await?;
        if locks.is_empty() {
            return Ok(Vec::new());
        }

        let additional = self.service.find_additional_locks(query, cancel).await?;

        Ok(locks
            .into_iter()
            .map(|tx| (tx, PartyTransactionType::Lock))
            .chain(
                additional
                    .into_iter()
                    .map(|tx| (tx, PartyTransactionType::AdditionalLock)),
            )
            .collect())
    }

    /// Address-scan indexers cannot discover locks, so locks recorded by an
    /// external request are fetched again and kept only when they pay the
    /// expected HTLC script
    async fn verify_recorded_locks(
        &self,
        swap: &Swap,
        role: SwapParty,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<(ChainTransaction, PartyTransactionType)>> {
        let mut verified = Vec::new();

        for party_tx in swap.party(role).transactions_of(&PartyTransactionType::LOCKS) {
            let tx_id = &party_tx.transaction.tx_id;
            let Some(tx) = self.service.get_transaction(&query.currency, tx_id, cancel).await? else {
                debug!("[swap {}] recorded lock {} not found on chain", swap.id, tx_id);
                continue;
            };

            if tx.amount(query) > Decimal::ZERO {
                verified.push((tx, party_tx.kind));
            }
        }

        Ok(verified)
    }
}
