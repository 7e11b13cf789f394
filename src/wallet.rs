//! Settlement actor invoked by the acceptor-side refund-or-redeem task
//!
//! Observed chain evidence stays authoritative for every status change; a
//! submission here only races the counterpart and its failures are swallowed
//! by the caller.

use crate::chain::ChainTransaction;
use crate::error::WatchtowerResult;
use crate::swap::Swap;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementActor: Send + Sync {
    /// Redeem this node's side using the secret revealed by `counterpart_tx`
    async fn redeem(&self, swap: &Swap, counterpart_tx: &ChainTransaction) -> WatchtowerResult<()>;

    /// Refund this node's side once the lock time has passed
    async fn refund(&self, swap: &Swap) -> WatchtowerResult<()>;
}

pub type SharedSettlement = Arc<dyn SettlementActor>;

/// Records the settlement it would submit
#[derive(Debug, Default)]
pub struct LoggingSettlement;

#[async_trait]
impl SettlementActor for LoggingSettlement {
    async fn redeem(&self, swap: &Swap, counterpart_tx: &ChainTransaction) -> WatchtowerResult<()> {
        info!(
            "[swap {}] redeem requested after {} {}",
            swap.id, counterpart_tx.currency, counterpart_tx.tx_id
        );
        Ok(())
    }

    async fn refund(&self, swap: &Swap) -> WatchtowerResult<()> {
        info!("[swap {}] refund requested", swap.id);
        Ok(())
    }
}
