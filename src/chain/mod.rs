//! Chain module - per-chain watchers answering HTLC lookups
//!
//! This module provides:
//! - The `BlockchainApi` capability every watcher implements
//! - A secure wrapper falling back across indexer providers
//! - UTXO script, EVM event-log and Tezos parameter-tree watchers
//! - Per-endpoint request limiting
//! - The `BlockchainService` routing façade

pub mod evm;
pub mod http;
pub mod limiter;
pub mod secure;
pub mod service;
pub mod tezos;
pub mod transaction;
pub mod utxo;

pub use limiter::{LimiterRegistry, RequestLimiter};
pub use secure::SecureApi;
pub use service::BlockchainService;
pub use transaction::{ChainPayload, ChainTransaction};

use crate::config::{CurrencyConfig, CurrencyFamily};
use crate::currency::Currency;
use crate::error::WatchtowerResult;

use async_trait::async_trait;
use evm::EtherScanApi;
use std::sync::Arc;
use std::time::Duration;
use tezos::TzktApi;
use tokio_util::sync::CancellationToken;
use utxo::{BlockCypherApi, InsightApi, UtxoApi};

/// Terms of one party's HTLC, as the searcher knows them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcQuery {
    pub currency: String,
    pub secret_hash: String,
    pub contract_address: Option<String>,
    pub lock_tx_id: Option<String>,
    /// Counterparty receiving address
    pub address: Option<String>,
    /// Locking party refund address
    pub refund_address: Option<String>,
    /// Swap creation time, unix seconds
    pub timestamp: i64,
    pub lock_time: u64,
    pub secret_size: usize,
}

impl HtlcQuery {
    /// Earliest refund time the lock must encode
    pub fn refund_timestamp(&self) -> i64 {
        self.timestamp
            .saturating_add(i64::try_from(self.lock_time).unwrap_or(i64::MAX))
    }
}

/// Capability set of a chain watcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockchainApi: Send + Sync {
    fn name(&self) -> String;

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>>;

    async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>>;

    async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>>;

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>>;

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>>;
}

/// Closed set of watcher families
pub enum ChainWatcher {
    Utxo(SecureApi<UtxoApi>),
    Evm(SecureApi<EtherScanApi>),
    Tezos(SecureApi<TzktApi>),
}

impl ChainWatcher {
    /// Build the watcher of a configured currency, providers in config order
    pub fn from_config(
        currency: &Currency,
        config: &CurrencyConfig,
        limiters: &LimiterRegistry,
    ) -> WatchtowerResult<Self> {
        let client = http::build_client()?;
        let limiter = |uri: &str, delay_ms: u64| limiters.limiter_for(uri, Duration::from_millis(delay_ms));

        let watcher = match config.family {
            CurrencyFamily::Bitcoin => {
                let insight = config.insight.iter().map(|p| {
                    UtxoApi::Insight(InsightApi::new(
                        currency,
                        http::IndexerClient::new(client.clone(), &p.base_uri, limiter(&p.base_uri, p.min_delay_ms)),
                    ))
                });
                let blockcypher = config.blockcypher.iter().map(|p| {
                    UtxoApi::BlockCypher(BlockCypherApi::new(
                        currency,
                        http::IndexerClient::new(client.clone(), &p.base_uri, limiter(&p.base_uri, p.min_delay_ms)),
                    ))
                });
                ChainWatcher::Utxo(SecureApi::new(&currency.name, insight.chain(blockcypher).collect()))
            }
            CurrencyFamily::Ethereum | CurrencyFamily::Erc20 => {
                let providers = config
                    .etherscan
                    .iter()
                    .map(|p| {
                        EtherScanApi::new(
                            currency,
                            p,
                            http::IndexerClient::new(client.clone(), &p.base_uri, limiter(&p.base_uri, p.min_delay_ms)),
                        )
                    })
                    .collect::<WatchtowerResult<Vec<_>>>()?;
                ChainWatcher::Evm(SecureApi::new(&currency.name, providers))
            }
            CurrencyFamily::Tezos | CurrencyFamily::Fa12 => {
                let providers = config
                    .tzkt
                    .iter()
                    .map(|p| {
                        TzktApi::new(
                            currency,
                            p,
                            http::IndexerClient::new(client.clone(), &p.base_uri, limiter(&p.base_uri, p.min_delay_ms)),
                        )
                    })
                    .collect();
                ChainWatcher::Tezos(SecureApi::new(&currency.name, providers))
            }
        };

        Ok(watcher)
    }

    fn api(&self) -> &dyn BlockchainApi {
        match self {
            ChainWatcher::Utxo(api) => api,
            ChainWatcher::Evm(api) => api,
            ChainWatcher::Tezos(api) => api,
        }
    }
}

#[async_trait]
impl BlockchainApi for ChainWatcher {
    fn name(&self) -> String {
        self.api().name()
    }

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.api().get_transaction(tx_id, cancel).await
    }

    async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.api().find_lock(query, cancel).await
    }

    async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        self.api().find_additional_locks(query, cancel).await
    }

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.api().find_redeem(query, cancel).await
    }

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.api().find_refund(query, cancel).await
    }
}

/// Shared handle used by the service registry
pub type SharedApi = Arc<dyn BlockchainApi>;
