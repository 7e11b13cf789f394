//! Transaction searcher
//!
//! Turns watcher results into persisted party transactions and party
//! statuses. Each search answers a single boolean progress question for the
//! caller; absence of evidence is `Ok(false)`, never an error.

mod lock;
mod redeem;
mod refund;

use crate::chain::{BlockchainService, ChainTransaction, HtlcQuery};
use crate::currency::Currencies;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;
use crate::repository::SharedRepository;
use crate::swap::amount::is_required_amount_locked;
use crate::swap::{Party, PartyStatus, PartyTransaction, PartyTransactionType, Swap, SwapParty};

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// HTLC terms of the lock sent by `role`
pub fn htlc_query(swap: &Swap, role: SwapParty, currencies: &Currencies) -> WatchtowerResult<HtlcQuery> {
    let currency = currencies.get(swap.sold_currency(role))?;
    let party = swap.party(role);
    let requisites = party.requisites.as_ref();

    let secret_hash = swap
        .secret_hash
        .clone()
        .or_else(|| requisites.and_then(|r| r.secret_hash.clone()))
        .unwrap_or_default();

    Ok(HtlcQuery {
        currency: currency.name.clone(),
        secret_hash,
        contract_address: swap.contract_by_currency(&currency.name).map(str::to_string),
        lock_tx_id: party
            .transactions_of(&[PartyTransactionType::Lock])
            .next()
            .map(|t| t.transaction.tx_id.clone()),
        address: swap
            .counter_party(role)
            .requisites
            .as_ref()
            .and_then(|r| r.receiving_address.clone()),
        refund_address: requisites.and_then(|r| r.refund_address.clone()),
        timestamp: swap.timestamp.timestamp(),
        lock_time: party.lock_time(),
        secret_size: currency.secret_size,
    })
}

#[derive(Clone)]
pub struct TransactionSearcher {
    repository: SharedRepository,
    service: Arc<BlockchainService>,
    currencies: Arc<Currencies>,
}

impl TransactionSearcher {
    pub fn new(
        repository: SharedRepository,
        service: Arc<BlockchainService>,
        currencies: Arc<Currencies>,
    ) -> Self {
        Self {
            repository,
            service,
            currencies,
        }
    }

    /// Persist discovered transactions on `party`. A link already holding the
    /// tx id is refreshed in place; otherwise a new link is added, reusing the
    /// canonical record for the same `(currency, tx_id)` when one exists.
    async fn upsert_transactions(
        &self,
        party: &Party,
        transactions: &[(ChainTransaction, PartyTransactionType)],
        query: &HtlcQuery,
    ) -> WatchtowerResult<()> {
        for (tx, kind) in transactions {
            if let Some(existing) = party.find_transaction(&tx.tx_id) {
                let updated = PartyTransaction {
                    transaction: tx.to_record(existing.transaction_id),
                    ..existing.clone()
                };
                self.repository.update_party_transaction(&updated).await?;
                continue;
            }

            let amount = if kind.is_lock() {
                tx.amount(query)
            } else {
                Decimal::ZERO
            };

            let transaction_id = self
                .repository
                .get_transaction(&tx.tx_id, &query.currency)
                .await?
                .map(|t| t.id)
                .unwrap_or(0);

            self.repository
                .add_party_transaction(&PartyTransaction {
                    id: 0,
                    party_id: party.id,
                    transaction_id,
                    transaction: tx.to_record(transaction_id),
                    kind: *kind,
                    amount: amount.to_string(),
                })
                .await?;

            debug!(
                "Party {} {} transaction {} recorded ({} {})",
                party.id, kind, tx.tx_id, amount, query.currency
            );
            metrics::record_transaction_discovered(&query.currency, kind.as_str());
        }

        Ok(())
    }

    /// Write the winner status and, for a jackpot, the loser in one step
    async fn settle(
        &self,
        winner: &Party,
        status: PartyStatus,
        loser: &Party,
    ) -> WatchtowerResult<()> {
        let mut updates = Vec::with_capacity(2);
        if winner.status != status {
            updates.push((winner.id, status));
        }
        if status == PartyStatus::Jackpot && loser.status != PartyStatus::Lost {
            updates.push((loser.id, PartyStatus::Lost));
        }

        if updates.is_empty() {
            return Ok(());
        }

        if !self.repository.update_party_statuses(&updates).await? {
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
        Ok(())
    }

    /// Confirmed spends of the lock sent by `lock_role`. For bitcoin-based
    /// currencies the spent HTLC outputs are traced input by input and must
    /// add up to the required amount.
    async fn is_spent_by(
        &self,
        swap: &Swap,
        lock_role: SwapParty,
        spends: &[ChainTransaction],
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<bool> {
        if let Some(tx) = spends.iter().find(|t| t.currency != query.currency) {
            return Err(WatchtowerError::InvalidArgument(format!(
                "transaction {} has currency {}, expected {}",
                tx.tx_id, tx.currency, query.currency
            )));
        }

        let confirmed: Vec<&ChainTransaction> = spends.iter().filter(|t| t.is_confirmed()).collect();
        if confirmed.is_empty() {
            return Ok(false);
        }

        if !self.currencies.is_bitcoin_based(&query.currency)? {
            return Ok(true);
        }

        let mut locks = HashMap::new();
        let recorded = swap
            .party(lock_role)
            .transactions_of(&PartyTransactionType::LOCKS)
            .filter(|t| t.transaction.is_confirmed());

        for party_tx in recorded {
            let tx_id = &party_tx.transaction.tx_id;
            if let Some(lock) = self.service.get_transaction(&query.currency, tx_id, cancel).await? {
                locks.insert(tx_id.to_lowercase(), lock);
            }
        }

        let mut spent = Decimal::ZERO;
        for spend in confirmed.iter().filter_map(|t| t.utxo()) {
            for input in &spend.inputs {
                let Some(lock) = locks.get(&input.prev_tx_id.to_lowercase()) else {
                    continue;
                };
                let Some(utxo) = lock.utxo() else {
                    continue;
                };
                let Some(output) = utxo.outputs.iter().find(|o| o.index == input.output_index) else {
                    warn!(
                        "[swap {}] input {} points to missing output {} of {}",
                        swap.id, input.index, input.output_index, lock.tx_id
                    );
                    continue;
                };

                if crate::chain::utxo::script::is_swap_payment_hex(&output.script_pub_key, query, utxo.network) {
                    spent += Decimal::from(output.value);
                }
            }
        }

        is_required_amount_locked(swap, lock_role, spent, &self.currencies)
    }
}
