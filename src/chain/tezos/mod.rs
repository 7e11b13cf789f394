//! Tzkt watcher for tez and FA1.2 HTLC contracts
//!
//! Tzkt cannot filter by parameter content, so every lookup scans the full
//! operation history of the swap contract. Scans are cached per contract for
//! a short TTL; a cached match is only trusted once it is confirmed.

pub mod params;

use super::http::IndexerClient;
use super::transaction::{ChainPayload, TezosAsset, TezosPayload};
use super::{BlockchainApi, ChainTransaction, HtlcQuery};
use crate::config::{CurrencyFamily, TzktConfig};
use crate::currency::Currency;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::swap::TransactionStatus;

use async_trait::async_trait;
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PAGE_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize)]
struct TzktOperation {
    hash: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    target: Option<TzktAccount>,
    #[serde(default, alias = "parameter")]
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct TzktAccount {
    #[serde(default)]
    address: Option<String>,
}

type ContractHistory = Arc<Vec<ChainTransaction>>;

pub struct TzktApi {
    currency: String,
    asset: TezosAsset,
    token_contract: Option<String>,
    contracts: Vec<String>,
    client: IndexerClient,
    cache: Cache<(String, String), ContractHistory>,
}

impl TzktApi {
    pub fn new(currency: &Currency, config: &TzktConfig, client: IndexerClient) -> Self {
        let asset = match currency.family {
            CurrencyFamily::Fa12 => TezosAsset::Fa12,
            _ => TezosAsset::Tez,
        };

        Self {
            currency: currency.name.clone(),
            asset,
            token_contract: currency.token_contract.clone(),
            contracts: config.contracts.clone(),
            client,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .build(),
        }
    }

    fn contract<'a>(&self, address: Option<&'a str>) -> WatchtowerResult<&'a str> {
        let address = address.unwrap_or_default();
        if self.contracts.iter().any(|c| c == address) {
            Ok(address)
        } else {
            Err(WatchtowerError::UnknownContract {
                currency: self.currency.clone(),
                address: address.to_string(),
            })
        }
    }

    fn cache_key(&self, contract: &str) -> (String, String) {
        (self.currency.clone(), contract.to_string())
    }

    /// Full operation history of a contract, oldest first
    async fn contract_history(&self, contract: &str, cancel: &CancellationToken) -> WatchtowerResult<ContractHistory> {
        let mut txs = Vec::new();
        let mut offset = 0;

        loop {
            let path = format!(
                "operations/transactions?target={}&offset={}&limit={}",
                contract, offset, PAGE_LIMIT
            );

            let page: Vec<TzktOperation> = self.client.get_json(&path, cancel).await?.unwrap_or_default();
            let count = page.len();

            for op in page {
                txs.push(self.to_chain_transaction(op)?);
            }

            if count < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }

        debug!("[{}] {} operations on {}", self.currency, txs.len(), contract);

        let history = Arc::new(txs);
        self.cache.insert(self.cache_key(contract), history.clone()).await;
        Ok(history)
    }

    /// Confirmed cached match, else the first match in a fresh scan
    async fn find_first<F>(
        &self,
        contract: &str,
        cancel: &CancellationToken,
        predicate: F,
    ) -> WatchtowerResult<Option<ChainTransaction>>
    where
        F: Fn(&TezosPayload) -> bool + Send + Sync,
    {
        let matches = |tx: &&ChainTransaction| match &tx.payload {
            ChainPayload::Tezos(tezos) => predicate(tezos),
            _ => false,
        };

        if let Some(cached) = self.cache.get(&self.cache_key(contract)).await {
            if let Some(tx) = cached.iter().find(&matches).filter(|tx| tx.is_confirmed()) {
                return Ok(Some(tx.clone()));
            }
        }

        let history = self.contract_history(contract, cancel).await?;
        Ok(history.iter().find(&matches).cloned())
    }

    fn to_chain_transaction(&self, op: TzktOperation) -> WatchtowerResult<ChainTransaction> {
        let status = match op.status.as_deref() {
            Some("applied") => TransactionStatus::Confirmed,
            Some("backtracked") | Some("skipped") | Some("failed") => TransactionStatus::Canceled,
            _ => TransactionStatus::Pending,
        };

        let parameters = match op.parameters {
            Value::Null => None,
            Value::String(raw) => Some(serde_json::from_str(&raw)?),
            other => Some(other),
        };

        let amount = match &op.amount {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .map_err(|e| WatchtowerError::Decode(format!("invalid amount {}: {}", n, e)))?,
            _ => Decimal::ZERO,
        };

        Ok(ChainTransaction {
            currency: self.currency.clone(),
            tx_id: op.hash,
            block_height: op.level,
            confirmations: if status == TransactionStatus::Confirmed { 1 } else { 0 },
            status,
            payload: ChainPayload::Tezos(TezosPayload {
                asset: self.asset,
                target: op.target.and_then(|t| t.address),
                amount,
                parameters,
            }),
        })
    }
}

#[async_trait]
impl BlockchainApi for TzktApi {
    fn name(&self) -> String {
        format!("tzkt({})", self.client.base_uri())
    }

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let ops: Option<Vec<TzktOperation>> = self
            .client
            .get_json(&format!("operations/transactions/{}", tx_id), cancel)
            .await?;

        ops.and_then(|ops| ops.into_iter().next())
            .map(|op| self.to_chain_transaction(op))
            .transpose()
    }

    async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        let participant = query.address.clone().unwrap_or_default();
        let refund_timestamp = query.refund_timestamp();
        let token = self.token_contract.clone();

        self.find_first(contract, cancel, |tx| {
            params::is_swap_init(tx, &query.secret_hash, &participant, refund_timestamp, token.as_deref())
        })
        .await
    }

    async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        if self.asset == TezosAsset::Fa12 {
            return Ok(Vec::new());
        }

        let history = self.contract_history(contract, cancel).await?;
        Ok(history
            .iter()
            .filter(|tx| match &tx.payload {
                ChainPayload::Tezos(tezos) => params::is_swap_add(tezos, &query.secret_hash),
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        self.find_first(contract, cancel, |tx| params::is_swap_redeem(tx, &query.secret_hash))
            .await
    }

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        self.find_first(contract, cancel, |tx| params::is_swap_refund(tx, &query.secret_hash))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::params::fixtures::{entry, tez_initiate, PARTICIPANT};
    use super::*;
    use crate::chain::http::fixtures::serve;
    use crate::chain::limiter::RequestLimiter;
    use crate::currency::fixtures::currency;
    use crate::swap::fixtures::{secret_hash, SECRET};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const CONTRACT: &str = "KT1VG2WtYdSWz5E7chTeAdDPZNy2MpP8pTWL";
    const REFUND: i64 = 1_600_036_000;

    fn query() -> HtlcQuery {
        HtlcQuery {
            currency: "XTZ".into(),
            secret_hash: secret_hash(),
            contract_address: Some(CONTRACT.into()),
            lock_tx_id: None,
            address: Some(PARTICIPANT.into()),
            refund_address: None,
            timestamp: 1_600_000_000,
            lock_time: 36_000,
            secret_size: 32,
        }
    }

    fn op(hash: &str, status: &str, amount: u64, parameters: Value) -> Value {
        json!({
            "hash": hash,
            "level": 1_200_000,
            "status": status,
            "amount": amount,
            "target": { "address": CONTRACT },
            "parameters": parameters.to_string()
        })
    }

    async fn api(history: Vec<Value>) -> TzktApi {
        let base = serve(vec![
            ("operations/transactions/oo1".into(), json!([history[0].clone()])),
            (format!("operations/transactions?target={}", CONTRACT), json!(history)),
        ])
        .await;

        TzktApi::new(
            &currency("XTZ", CurrencyFamily::Tezos, dec!(1000000)),
            &TzktConfig {
                base_uri: base.clone(),
                min_delay_ms: 0,
                contracts: vec![CONTRACT.into()],
                cache_ttl_secs: 30,
                cache_capacity: 16,
            },
            IndexerClient::new(reqwest::Client::new(), &base, Arc::new(RequestLimiter::disabled())),
        )
    }

    fn history() -> Vec<Value> {
        vec![
            op("oo1", "applied", 2_000_000, entry("initiate", tez_initiate(&secret_hash(), REFUND))),
            op("oo2", "applied", 500_000, entry("add", json!({ "bytes": secret_hash() }))),
            op("oo3", "failed", 0, entry("redeem", json!({ "bytes": SECRET }))),
            op("oo4", "applied", 0, entry("redeem", json!({ "bytes": SECRET }))),
        ]
    }

    #[tokio::test]
    async fn test_get_transaction() {
        let api = api(history()).await;
        let tx = api
            .get_transaction("oo1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tx.block_height, 1_200_000);
        assert!(tx.is_confirmed());
        assert_eq!(tx.amount(&query()), dec!(2000000));
    }

    #[tokio::test]
    async fn test_find_lock_add_and_redeem() {
        let api = api(history()).await;
        let cancel = CancellationToken::new();

        let lock = api.find_lock(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(lock.tx_id, "oo1");

        let adds = api.find_additional_locks(&query(), &cancel).await.unwrap();
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].amount(&query()), dec!(500000));

        let redeem = api.find_redeem(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(redeem.tx_id, "oo3");
        assert_eq!(redeem.status, TransactionStatus::Canceled);
        assert_eq!(redeem.secret(&secret_hash(), 32), Some(SECRET.to_string()));

        assert!(api.find_refund(&query(), &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_with_early_refund_time_is_not_matched() {
        let api = api(vec![op(
            "oo1",
            "applied",
            2_000_000,
            entry("initiate", tez_initiate(&secret_hash(), REFUND - 60)),
        )])
        .await;

        assert!(api
            .find_lock(&query(), &CancellationToken::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_contract() {
        let api = api(history()).await;
        let mut q = query();
        q.contract_address = Some("KT1unknown".into());

        let err = api.find_redeem(&q, &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_object_parameters_accepted() {
        let api = TzktApi::new(
            &currency("XTZ", CurrencyFamily::Tezos, dec!(1000000)),
            &TzktConfig {
                base_uri: "https://api.tzkt.io/v1/".into(),
                min_delay_ms: 0,
                contracts: vec![CONTRACT.into()],
                cache_ttl_secs: 30,
                cache_capacity: 16,
            },
            IndexerClient::new(
                reqwest::Client::new(),
                "https://api.tzkt.io/v1/",
                Arc::new(RequestLimiter::disabled()),
            ),
        );

        let raw: TzktOperation = serde_json::from_value(json!({
            "hash": "oo9",
            "status": "backtracked",
            "parameter": { "entrypoint": "refund", "value": { "bytes": secret_hash() } }
        }))
        .unwrap();

        let tx = api.to_chain_transaction(raw).unwrap();
        assert_eq!(tx.status, TransactionStatus::Canceled);
        let ChainPayload::Tezos(tezos) = &tx.payload else {
            panic!("expected a tezos payload");
        };
        assert!(params::is_swap_refund(tezos, &secret_hash()));
    }
}
