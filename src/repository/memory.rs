//! In-process repository used by tests and the memory backend

use super::DataRepository;
use crate::error::WatchtowerResult;
use crate::swap::{
    Party, PartyStatus, PartyTransaction, PartyTransactionType, SortOrder, Swap, SwapQuery, Transaction,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct LinkRow {
    party_id: i64,
    transaction_id: i64,
    kind: PartyTransactionType,
    amount: String,
}

#[derive(Debug, Default)]
struct Store {
    /// Swaps with party transactions stripped
    swaps: BTreeMap<i64, Swap>,
    transactions: BTreeMap<i64, Transaction>,
    links: BTreeMap<i64, LinkRow>,
    next_swap_id: i64,
    next_party_id: i64,
    next_transaction_id: i64,
    next_link_id: i64,
}

impl Store {
    fn party_mut(&mut self, party_id: i64) -> Option<&mut Party> {
        self.swaps.values_mut().find_map(|s| {
            if s.initiator.id == party_id {
                Some(&mut s.initiator)
            } else if s.acceptor.id == party_id {
                Some(&mut s.acceptor)
            } else {
                None
            }
        })
    }

    fn has_party(&self, party_id: i64) -> bool {
        self.swaps
            .values()
            .any(|s| s.initiator.id == party_id || s.acceptor.id == party_id)
    }

    fn find_transaction(&self, tx_id: &str, currency: &str) -> Option<&Transaction> {
        self.transactions
            .values()
            .find(|t| t.currency == currency && t.tx_id.eq_ignore_ascii_case(tx_id))
    }

    /// Insert or refresh the canonical record, returning its id
    fn upsert_transaction(&mut self, transaction: &Transaction) -> i64 {
        let existing = if transaction.id > 0 && self.transactions.contains_key(&transaction.id) {
            Some(transaction.id)
        } else {
            self.find_transaction(&transaction.tx_id, &transaction.currency)
                .map(|t| t.id)
        };

        let id = existing.unwrap_or_else(|| {
            self.next_transaction_id += 1;
            self.next_transaction_id
        });

        self.transactions.insert(id, Transaction { id, ..transaction.clone() });
        id
    }

    fn materialize(&self, swap: &Swap) -> Swap {
        let mut swap = swap.clone();
        swap.initiator.transactions = self.party_transactions(swap.initiator.id);
        swap.acceptor.transactions = self.party_transactions(swap.acceptor.id);
        swap
    }

    fn party_transactions(&self, party_id: i64) -> Vec<PartyTransaction> {
        self.links
            .iter()
            .filter(|(_, link)| link.party_id == party_id)
            .filter_map(|(id, link)| {
                let transaction = self.transactions.get(&link.transaction_id)?;
                Some(PartyTransaction {
                    id: *id,
                    party_id,
                    transaction_id: link.transaction_id,
                    transaction: transaction.clone(),
                    kind: link.kind,
                    amount: link.amount.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    store: RwLock<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataRepository for MemoryRepository {
    async fn add_swap(&self, swap: &Swap) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        if store.swaps.contains_key(&swap.id) {
            return Ok(false);
        }

        let mut swap = swap.clone();
        if swap.id == 0 {
            let highest = store.swaps.keys().max().copied().unwrap_or(0);
            store.next_swap_id = store.next_swap_id.max(highest) + 1;
            swap.id = store.next_swap_id;
        }

        for party in [&mut swap.initiator, &mut swap.acceptor] {
            store.next_party_id += 1;
            party.id = store.next_party_id;
            party.transactions.clear();
        }

        store.swaps.insert(swap.id, swap);
        Ok(true)
    }

    async fn get_swap(&self, id: i64) -> WatchtowerResult<Option<Swap>> {
        let store = self.store.read().await;
        Ok(store.swaps.get(&id).map(|s| store.materialize(s)))
    }

    async fn get_swaps(&self, query: &SwapQuery) -> WatchtowerResult<Vec<Swap>> {
        let store = self.store.read().await;

        let mut swaps: Vec<Swap> = store
            .swaps
            .values()
            .map(|s| store.materialize(s))
            .filter(|s| query.matches(s))
            .collect();

        if query.sort == SortOrder::Desc {
            swaps.reverse();
        }

        Ok(swaps
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn update_swap(&self, swap: &Swap) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        let Some(stored) = store.swaps.get_mut(&swap.id) else {
            return Ok(false);
        };

        stored.symbol = swap.symbol.clone();
        stored.timestamp = swap.timestamp;
        stored.price = swap.price;
        stored.qty = swap.qty;
        stored.secret = swap.secret.clone();
        stored.secret_hash = swap.secret_hash.clone();
        stored.base_currency_contract = swap.base_currency_contract.clone();
        stored.quote_currency_contract = swap.quote_currency_contract.clone();
        stored.old_id = swap.old_id;
        Ok(true)
    }

    async fn add_secret(&self, swap_id: i64, secret: &str) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        match store.swaps.get_mut(&swap_id) {
            Some(swap) if swap.secret.is_none() => {
                swap.secret = Some(secret.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_party(&self, party: &Party) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        let Some(stored) = store.party_mut(party.id) else {
            return Ok(false);
        };

        stored.requisites = party.requisites.clone();
        stored.side = party.side;
        stored.status = party.status;
        Ok(true)
    }

    async fn update_party_status(&self, party_id: i64, status: PartyStatus) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        match store.party_mut(party_id) {
            Some(party) => {
                party.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_party_statuses(&self, updates: &[(i64, PartyStatus)]) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        if !updates.iter().all(|(id, _)| store.has_party(*id)) {
            return Ok(false);
        }

        for (id, status) in updates {
            if let Some(party) = store.party_mut(*id) {
                party.status = *status;
            }
        }
        Ok(true)
    }

    async fn add_party_transaction(&self, party_tx: &PartyTransaction) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        if !store.has_party(party_tx.party_id) {
            return Ok(false);
        }

        let transaction_id = store.upsert_transaction(&party_tx.transaction);

        store.next_link_id += 1;
        let id = store.next_link_id;
        store.links.insert(
            id,
            LinkRow {
                party_id: party_tx.party_id,
                transaction_id,
                kind: party_tx.kind,
                amount: party_tx.amount.clone(),
            },
        );
        Ok(true)
    }

    async fn update_party_transaction(&self, party_tx: &PartyTransaction) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        if !store.links.contains_key(&party_tx.id) {
            return Ok(false);
        }

        let transaction_id = store.upsert_transaction(&party_tx.transaction);

        if let Some(link) = store.links.get_mut(&party_tx.id) {
            link.transaction_id = transaction_id;
            link.kind = party_tx.kind;
            link.amount = party_tx.amount.clone();
        }
        Ok(true)
    }

    async fn remove_party_transaction(&self, id: i64) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;
        Ok(store.links.remove(&id).is_some())
    }

    async fn get_transaction(&self, tx_id: &str, currency: &str) -> WatchtowerResult<Option<Transaction>> {
        let store = self.store.read().await;
        Ok(store.find_transaction(tx_id, currency).cloned())
    }

    async fn update_transaction(&self, transaction: &Transaction) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        match store.transactions.get_mut(&transaction.id) {
            Some(stored) => {
                *stored = transaction.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_transaction(&self, id: i64) -> WatchtowerResult<bool> {
        let mut store = self.store.write().await;

        if store.links.values().any(|l| l.transaction_id == id) {
            return Ok(false);
        }
        Ok(store.transactions.remove(&id).is_some())
    }

    async fn health_check(&self) -> WatchtowerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures::swap;
    use crate::swap::{SwapFilter, TransactionStatus};
    use chrono::Utc;

    fn lock(party_id: i64, tx_id: &str, status: TransactionStatus) -> PartyTransaction {
        PartyTransaction {
            id: 0,
            party_id,
            transaction_id: 0,
            transaction: Transaction {
                id: 0,
                currency: "ETH".into(),
                tx_id: tx_id.into(),
                block_height: 100,
                confirmations: 0,
                status,
            },
            kind: PartyTransactionType::Lock,
            amount: "1000000000".into(),
        }
    }

    #[tokio::test]
    async fn test_swap_round_trip() {
        let repo = MemoryRepository::new();
        let mut swap = swap(Utc::now());
        swap.id = 42;

        assert!(repo.add_swap(&swap).await.unwrap());
        assert!(!repo.add_swap(&swap).await.unwrap());

        let stored = repo.get_swap(42).await.unwrap().unwrap();
        assert_ne!(stored.initiator.id, stored.acceptor.id);
        assert_eq!(stored.symbol, "ETH/BTC");
        assert!(repo.get_swap(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_record_shared_by_tx_id() {
        let repo = MemoryRepository::new();
        repo.add_swap(&swap(Utc::now())).await.unwrap();
        let stored = repo.get_swap(1).await.unwrap().unwrap();

        let initiator = stored.initiator.id;
        let acceptor = stored.acceptor.id;

        repo.add_party_transaction(&lock(initiator, "0xAB", TransactionStatus::Pending))
            .await
            .unwrap();

        let mut redeem = lock(acceptor, "0xab", TransactionStatus::Confirmed);
        redeem.kind = PartyTransactionType::Redeem;
        repo.add_party_transaction(&redeem).await.unwrap();

        let stored = repo.get_swap(1).await.unwrap().unwrap();
        assert_eq!(
            stored.initiator.transactions[0].transaction_id,
            stored.acceptor.transactions[0].transaction_id
        );
        assert!(stored.initiator.transactions[0].transaction.is_confirmed());

        let tx = repo.get_transaction("0xab", "ETH").await.unwrap().unwrap();
        assert!(!repo.remove_transaction(tx.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_pair_is_all_or_nothing() {
        let repo = MemoryRepository::new();
        repo.add_swap(&swap(Utc::now())).await.unwrap();
        let stored = repo.get_swap(1).await.unwrap().unwrap();

        let applied = repo
            .update_party_statuses(&[(stored.initiator.id, PartyStatus::Jackpot), (999, PartyStatus::Lost)])
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(
            repo.get_swap(1).await.unwrap().unwrap().initiator.status,
            PartyStatus::Involved
        );

        repo.update_party_statuses(&[
            (stored.initiator.id, PartyStatus::Jackpot),
            (stored.acceptor.id, PartyStatus::Lost),
        ])
        .await
        .unwrap();
        let swap = repo.get_swap(1).await.unwrap().unwrap();
        assert_eq!(swap.initiator.status, PartyStatus::Jackpot);
        assert_eq!(swap.acceptor.status, PartyStatus::Lost);
    }

    #[tokio::test]
    async fn test_secret_set_once() {
        let repo = MemoryRepository::new();
        repo.add_swap(&swap(Utc::now())).await.unwrap();

        assert!(repo.add_secret(1, "aa").await.unwrap());
        assert!(!repo.add_secret(1, "bb").await.unwrap());
        assert_eq!(repo.get_swap(1).await.unwrap().unwrap().secret.as_deref(), Some("aa"));
    }

    #[tokio::test]
    async fn test_get_swaps_query() {
        let repo = MemoryRepository::new();
        for id in 1..=3 {
            let mut s = swap(Utc::now());
            s.id = id;
            repo.add_swap(&s).await.unwrap();
        }
        let done = repo.get_swap(2).await.unwrap().unwrap();
        repo.update_party_statuses(&[
            (done.initiator.id, PartyStatus::Redeemed),
            (done.acceptor.id, PartyStatus::Redeemed),
        ])
        .await
        .unwrap();

        let active = repo.get_swaps(&SwapQuery::active_since(0)).await.unwrap();
        assert_eq!(active.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 3]);

        let latest = repo
            .get_swaps(&SwapQuery {
                filters: vec![SwapFilter::IdAbove(0)],
                sort: SortOrder::Desc,
                offset: 0,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(latest[0].id, 3);
    }
}
