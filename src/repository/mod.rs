//! Swap storage
//!
//! The resolution engine only needs this narrow contract. Every method is a
//! complete, self-contained write so an interrupted caller never leaves a
//! half-applied change behind. Ordinary absence is `Ok(None)` / `Ok(false)`.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

use crate::error::WatchtowerResult;
use crate::swap::{Party, PartyStatus, PartyTransaction, Swap, SwapQuery, Transaction};

use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Store a new swap with both parties; false if the id is taken
    async fn add_swap(&self, swap: &Swap) -> WatchtowerResult<bool>;

    /// Swap with parties, party transactions and transactions materialized
    async fn get_swap(&self, id: i64) -> WatchtowerResult<Option<Swap>>;

    async fn get_swaps(&self, query: &SwapQuery) -> WatchtowerResult<Vec<Swap>>;

    /// Scalar swap fields only; parties are written through `update_party`
    async fn update_swap(&self, swap: &Swap) -> WatchtowerResult<bool>;

    /// Record the secret unless one is already set
    async fn add_secret(&self, swap_id: i64, secret: &str) -> WatchtowerResult<bool>;

    /// Requisites, side and status; party transactions are left untouched
    async fn update_party(&self, party: &Party) -> WatchtowerResult<bool>;

    async fn update_party_status(&self, party_id: i64, status: PartyStatus) -> WatchtowerResult<bool>;

    /// All statuses are applied or none is
    async fn update_party_statuses(&self, updates: &[(i64, PartyStatus)]) -> WatchtowerResult<bool>;

    /// Link a transaction to a party. An existing `(currency, tx_id)` record is
    /// reused and refreshed instead of inserting a duplicate.
    async fn add_party_transaction(&self, party_tx: &PartyTransaction) -> WatchtowerResult<bool>;

    /// Amount and kind of the link plus the linked transaction record
    async fn update_party_transaction(&self, party_tx: &PartyTransaction) -> WatchtowerResult<bool>;

    async fn remove_party_transaction(&self, id: i64) -> WatchtowerResult<bool>;

    /// Case-insensitive on the transaction id
    async fn get_transaction(&self, tx_id: &str, currency: &str) -> WatchtowerResult<Option<Transaction>>;

    async fn update_transaction(&self, transaction: &Transaction) -> WatchtowerResult<bool>;

    /// Removes the record only once no party links to it
    async fn remove_transaction(&self, id: i64) -> WatchtowerResult<bool>;

    async fn health_check(&self) -> WatchtowerResult<()>;
}

/// Shared repository handle
pub type SharedRepository = std::sync::Arc<dyn DataRepository>;
