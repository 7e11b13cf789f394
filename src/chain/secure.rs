//! Watcher fronting several indexer providers with ordered fallback

use super::{BlockchainApi, ChainTransaction, HtlcQuery};
use crate::error::WatchtowerResult;
use crate::metrics;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Tries each provider in order and returns the first answer that is not an
/// error. When every provider fails the absent default is returned, so an
/// indexer outage turns into a wait instead of a failed swap. Configuration
/// errors and cancellation are never swallowed.
pub struct SecureApi<A> {
    currency: String,
    providers: Vec<A>,
}

impl<A: BlockchainApi> SecureApi<A> {
    pub fn new(currency: &str, providers: Vec<A>) -> Self {
        Self {
            currency: currency.to_string(),
            providers,
        }
    }

    pub fn providers(&self) -> &[A] {
        &self.providers
    }

    async fn first_ok<'a, T, F>(&'a self, operation: &'static str, call: F) -> WatchtowerResult<T>
    where
        T: Default + Send,
        F: Fn(&'a A) -> BoxFuture<'a, WatchtowerResult<T>> + Send,
    {
        for provider in &self.providers {
            match call(provider).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_config() || e.is_cancelled() => return Err(e),
                Err(e) => {
                    let name = provider.name();
                    warn!(
                        "[{}] {} failed on provider {}: {}",
                        self.currency, operation, name, e
                    );
                    metrics::record_provider_failure(&self.currency, &name);
                }
            }
        }

        Ok(T::default())
    }
}

#[async_trait]
impl<A: BlockchainApi> BlockchainApi for SecureApi<A> {
    fn name(&self) -> String {
        format!("secure-{}", self.currency.to_lowercase())
    }

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.first_ok("get_transaction", |api| api.get_transaction(tx_id, cancel))
            .await
    }

    async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.first_ok("find_lock", |api| api.find_lock(query, cancel))
            .await
    }

    async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        self.first_ok("find_additional_locks", |api| {
            api.find_additional_locks(query, cancel)
        })
        .await
    }

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.first_ok("find_redeem", |api| api.find_redeem(query, cancel))
            .await
    }

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.first_ok("find_refund", |api| api.find_refund(query, cancel))
            .await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::chain::transaction::{ChainPayload, TezosAsset, TezosPayload};
    use crate::swap::TransactionStatus;
    use rust_decimal::Decimal;

    pub fn tx(tx_id: &str, confirmed: bool) -> ChainTransaction {
        ChainTransaction {
            currency: "XTZ".into(),
            tx_id: tx_id.into(),
            block_height: 10,
            confirmations: if confirmed { 1 } else { 0 },
            status: if confirmed {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            },
            payload: ChainPayload::Tezos(TezosPayload {
                asset: TezosAsset::Tez,
                target: None,
                amount: Decimal::ZERO,
                parameters: None,
            }),
        }
    }

    pub fn query() -> HtlcQuery {
        HtlcQuery {
            currency: "XTZ".into(),
            secret_hash: "ab".repeat(32),
            contract_address: Some("KT1VG2WtYdSWz5E7chTeAdDPZNy2MpP8pTWL".into()),
            lock_tx_id: None,
            address: None,
            refund_address: None,
            timestamp: 0,
            lock_time: 0,
            secret_size: 32,
        }
    }
}
