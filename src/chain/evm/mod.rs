//! EtherScan watcher for ether and ERC20 HTLC contracts
//!
//! Swap transactions are located through contract event logs filtered by
//! event signature and secret hash, then fetched by hash together with their
//! receipt status and the current chain head.

pub mod abi;

use super::http::IndexerClient;
use super::transaction::{ChainPayload, EvmAsset, EvmPayload};
use super::{BlockchainApi, ChainTransaction, HtlcQuery};
use crate::config::{CurrencyFamily, EtherScanConfig, EvmContractConfig};
use crate::currency::Currency;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::swap::TransactionStatus;

use abi::SwapEvent;
use alloy_primitives::U256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const NO_RECORDS: &str = "No records found";

#[derive(Debug, Deserialize)]
struct EtherScanResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventLog {
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

pub struct EtherScanApi {
    currency: String,
    asset: EvmAsset,
    token_contract: Option<String>,
    api_token: String,
    contracts: Vec<EvmContractConfig>,
    client: IndexerClient,
}

impl EtherScanApi {
    pub fn new(currency: &Currency, config: &EtherScanConfig, client: IndexerClient) -> WatchtowerResult<Self> {
        let asset = match currency.family {
            CurrencyFamily::Ethereum => EvmAsset::Ether,
            CurrencyFamily::Erc20 => EvmAsset::Erc20,
            other => {
                return Err(WatchtowerError::Config(format!(
                    "{} is a {:?} currency, not an EVM one",
                    currency.name, other
                )))
            }
        };

        if asset == EvmAsset::Erc20 && currency.token_contract.is_none() {
            return Err(WatchtowerError::Config(format!(
                "ERC20 currency {} has no token contract",
                currency.name
            )));
        }

        Ok(Self {
            currency: currency.name.clone(),
            asset,
            token_contract: currency.token_contract.clone(),
            api_token: config.api_token.clone(),
            contracts: config.contracts.clone(),
            client,
        })
    }

    fn contract(&self, address: Option<&str>) -> WatchtowerResult<&EvmContractConfig> {
        let address = address.unwrap_or_default();
        self.contracts
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| WatchtowerError::UnknownContract {
                currency: self.currency.clone(),
                address: address.to_string(),
            })
    }

    async fn call(&self, query: &str, cancel: &CancellationToken) -> WatchtowerResult<Option<EtherScanResponse>> {
        self.client
            .get_json(&format!("api?{}&apikey={}", query, self.api_token), cancel)
            .await
    }

    fn provider_error(&self, response: &EtherScanResponse) -> WatchtowerError {
        WatchtowerError::provider(
            self.name(),
            format!(
                "{}: {}",
                response.message.as_deref().unwrap_or("NOTOK"),
                response.result
            ),
        )
    }

    /// Logs of `contract` matching the topics, in chain order
    async fn get_logs(
        &self,
        contract: &EvmContractConfig,
        topics: &[String],
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<EventLog>> {
        let mut query = format!(
            "module=logs&action=getLogs&address={}&fromBlock={}&toBlock=latest",
            contract.address, contract.start_block
        );

        for (i, topic) in topics.iter().enumerate() {
            if i > 0 {
                query.push_str(&format!("&topic{}_{}_opr=and", i - 1, i));
            }
            query.push_str(&format!("&topic{}={}", i, topic));
        }

        let Some(response) = self.call(&query, cancel).await? else {
            return Ok(Vec::new());
        };

        if response.status.as_deref() == Some("0") {
            if response.message.as_deref() == Some(NO_RECORDS) {
                return Ok(Vec::new());
            }
            return Err(self.provider_error(&response));
        }

        Ok(serde_json::from_value(response.result)?)
    }

    async fn find_by_event(
        &self,
        query: &HtlcQuery,
        event: SwapEvent,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        let topics = [
            abi::event_topic(self.asset, event),
            abi::hash_topic(&query.secret_hash),
        ];

        match self.get_logs(contract, &topics, cancel).await?.first() {
            Some(log) => self.get_transaction(&log.transaction_hash, cancel).await,
            None => Ok(None),
        }
    }

    async fn receipt_status(&self, tx_id: &str, cancel: &CancellationToken) -> WatchtowerResult<TransactionStatus> {
        let query = format!("module=transaction&action=gettxreceiptstatus&txhash={}", tx_id);
        let Some(response) = self.call(&query, cancel).await? else {
            return Ok(TransactionStatus::Pending);
        };

        if response.status.as_deref() == Some("0") {
            return Err(self.provider_error(&response));
        }

        Ok(match response.result.pointer("/status").and_then(Value::as_str) {
            Some("0") => TransactionStatus::Canceled,
            Some("1") => TransactionStatus::Confirmed,
            _ => TransactionStatus::Pending,
        })
    }

    async fn block_number(&self, cancel: &CancellationToken) -> WatchtowerResult<Option<i64>> {
        let Some(response) = self.call("module=proxy&action=eth_blockNumber", cancel).await? else {
            return Ok(None);
        };

        match response.result.as_str() {
            Some(hex) => Ok(Some(parse_hex_i64(hex)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BlockchainApi for EtherScanApi {
    fn name(&self) -> String {
        format!("etherscan({})", self.client.base_uri())
    }

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let query = format!("module=proxy&action=eth_getTransactionByHash&txhash={}", tx_id);
        let Some(response) = self.call(&query, cancel).await? else {
            return Ok(None);
        };

        if response.result.is_null() {
            return Ok(None);
        }

        let tx: RpcTransaction = serde_json::from_value(response.result)?;
        let block_height = match tx.block_number.as_deref() {
            Some(hex) => parse_hex_i64(hex)?,
            None => 0,
        };

        let status = self.receipt_status(tx_id, cancel).await?;

        let confirmations = if block_height > 0 {
            match self.block_number(cancel).await? {
                Some(head) => (head - block_height).max(0),
                None => 0,
            }
        } else {
            0
        };

        Ok(Some(ChainTransaction {
            currency: self.currency.clone(),
            tx_id: tx_id.to_string(),
            block_height,
            confirmations,
            status,
            payload: ChainPayload::Evm(EvmPayload {
                asset: self.asset,
                from: tx.from.unwrap_or_default(),
                to: tx.to.unwrap_or_default(),
                input: tx.input.unwrap_or_else(|| "0x".to_string()),
                value: match tx.value.as_deref() {
                    Some(hex) => parse_hex_u256(hex)?,
                    None => U256::ZERO,
                },
            }),
        }))
    }

    async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        let participant = query.address.as_deref().ok_or_else(|| {
            WatchtowerError::InvalidArgument("lock search without participant address".into())
        })?;

        let mut topics = vec![
            abi::event_topic(self.asset, SwapEvent::Initiated),
            abi::hash_topic(&query.secret_hash),
        ];
        if let Some(token) = self.token_contract.as_deref().filter(|_| self.asset == EvmAsset::Erc20) {
            topics.push(abi::address_topic(token));
        }
        topics.push(abi::address_topic(participant));

        let logs = self.get_logs(contract, &topics, cancel).await?;
        let Some(log) = logs.first() else {
            return Ok(None);
        };

        if logs.len() > 1 {
            warn!(
                "[{}] {} initiate events for secret hash {}, using the first",
                self.currency,
                logs.len(),
                query.secret_hash
            );
        }

        let Some(lock) = self.get_transaction(&log.transaction_hash, cancel).await? else {
            return Ok(None);
        };

        let ChainPayload::Evm(evm) = &lock.payload else {
            return Ok(None);
        };

        if !abi::is_lock_timely(evm, query.refund_timestamp()) {
            debug!(
                "[{}] lock {} rejected: refund time earlier than {}",
                self.currency,
                lock.tx_id,
                query.refund_timestamp()
            );
            return Ok(None);
        }

        Ok(Some(lock))
    }

    async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        let contract = self.contract(query.contract_address.as_deref())?;
        let topics = [
            abi::event_topic(self.asset, SwapEvent::Added),
            abi::hash_topic(&query.secret_hash),
        ];

        let mut locks: Vec<ChainTransaction> = Vec::new();
        for log in self.get_logs(contract, &topics, cancel).await? {
            if locks.iter().any(|l| l.tx_id.eq_ignore_ascii_case(&log.transaction_hash)) {
                continue;
            }
            if let Some(tx) = self.get_transaction(&log.transaction_hash, cancel).await? {
                locks.push(tx);
            }
        }

        Ok(locks)
    }

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.find_by_event(query, SwapEvent::Redeemed, cancel).await
    }

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.find_by_event(query, SwapEvent::Refunded, cancel).await
    }
}

fn parse_hex_i64(hex: &str) -> WatchtowerResult<i64> {
    i64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| WatchtowerError::Decode(format!("invalid hex number {}: {}", hex, e)))
}

fn parse_hex_u256(hex: &str) -> WatchtowerResult<U256> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| WatchtowerError::Decode(format!("invalid hex number {}: {}", hex, e)))
}

#[cfg(test)]
mod tests {
    use super::abi::fixtures::{erc20_initiate, eth_initiate, redeem, PARTICIPANT, TOKEN};
    use super::*;
    use crate::chain::http::fixtures::serve;
    use crate::chain::limiter::RequestLimiter;
    use crate::currency::fixtures::currency;
    use crate::swap::fixtures::{secret_hash, SECRET};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    const CONTRACT: &str = "0xe9c251cbb4881f9e056e40135e7d3ea9a7d037df";
    const LOCK_TX: &str = "0xaaaa";
    const REDEEM_TX: &str = "0xbbbb";
    const REFUND_TS: u64 = 1_600_036_000;

    fn query() -> HtlcQuery {
        HtlcQuery {
            currency: "ETH".into(),
            secret_hash: secret_hash(),
            contract_address: Some(CONTRACT.to_uppercase().replace("0X", "0x")),
            lock_tx_id: None,
            address: Some(PARTICIPANT.into()),
            refund_address: None,
            timestamp: 1_600_000_000,
            lock_time: 36_000,
            secret_size: 32,
        }
    }

    fn config(base: &str) -> EtherScanConfig {
        EtherScanConfig {
            base_uri: base.into(),
            api_token: "TOKEN".into(),
            min_delay_ms: 0,
            contracts: vec![EvmContractConfig {
                address: CONTRACT.into(),
                start_block: 8_000_000,
            }],
        }
    }

    fn logs(tx_hash: &str) -> Value {
        json!({ "status": "1", "message": "OK", "result": [{ "transactionHash": tx_hash, "topics": [] }] })
    }

    fn rpc_tx(input: String, wei_hex: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "blockNumber": "0x10",
                "from": "0x1111111111111111111111111111111111111111",
                "to": CONTRACT,
                "input": input,
                "value": wei_hex
            }
        })
    }

    fn common_routes() -> Vec<(String, Value)> {
        vec![
            (
                "action=gettxreceiptstatus".into(),
                json!({ "status": "1", "message": "OK", "result": { "status": "1" } }),
            ),
            (
                "action=eth_blockNumber".into(),
                json!({ "jsonrpc": "2.0", "id": 83, "result": "0x14" }),
            ),
        ]
    }

    async fn ether_api(lock_input: String) -> EtherScanApi {
        let mut routes = vec![
            (
                format!("topic0={}", abi::event_topic(EvmAsset::Ether, SwapEvent::Initiated)),
                logs(LOCK_TX),
            ),
            (
                format!("topic0={}", abi::event_topic(EvmAsset::Ether, SwapEvent::Redeemed)),
                logs(REDEEM_TX),
            ),
            (
                format!("topic0={}", abi::event_topic(EvmAsset::Ether, SwapEvent::Added)),
                json!({ "status": "0", "message": NO_RECORDS, "result": [] }),
            ),
            (
                format!("eth_getTransactionByHash&txhash={}", LOCK_TX),
                rpc_tx(lock_input, "0xde0b6b3a7640000"),
            ),
            (
                format!("eth_getTransactionByHash&txhash={}", REDEEM_TX),
                rpc_tx(redeem(&secret_hash(), SECRET), "0x0"),
            ),
        ];
        routes.extend(common_routes());

        let base = serve(routes).await;
        EtherScanApi::new(
            &currency("ETH", CurrencyFamily::Ethereum, dec!(1000000000)),
            &config(&base),
            IndexerClient::new(reqwest::Client::new(), &base, Arc::new(RequestLimiter::disabled())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_lock_and_redeem() {
        let api = ether_api(eth_initiate(&secret_hash(), REFUND_TS)).await;
        let cancel = CancellationToken::new();

        let lock = api.find_lock(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(lock.tx_id, LOCK_TX);
        assert_eq!(lock.block_height, 16);
        assert_eq!(lock.confirmations, 4);
        assert!(lock.is_confirmed());
        assert_eq!(lock.amount(&query()), dec!(1000000000));

        let redeem = api.find_redeem(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(redeem.secret(&secret_hash(), 32), Some(SECRET.to_string()));

        assert!(api.find_refund(&query(), &cancel).await.unwrap().is_none());
        assert!(api.find_additional_locks(&query(), &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_with_early_refund_time_is_rejected() {
        let api = ether_api(eth_initiate(&secret_hash(), REFUND_TS - 1)).await;
        let cancel = CancellationToken::new();

        assert!(api.find_lock(&query(), &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_contract_is_config_error() {
        let api = ether_api(eth_initiate(&secret_hash(), REFUND_TS)).await;
        let cancel = CancellationToken::new();

        let mut q = query();
        q.contract_address = Some("0x0000000000000000000000000000000000000001".into());
        let err = api.find_lock(&q, &cancel).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_etherscan_error_status_is_provider_error() {
        let base = serve(vec![(
            "action=getLogs".into(),
            json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" }),
        )])
        .await;
        let api = EtherScanApi::new(
            &currency("ETH", CurrencyFamily::Ethereum, dec!(1000000000)),
            &config(&base),
            IndexerClient::new(reqwest::Client::new(), &base, Arc::new(RequestLimiter::disabled())),
        )
        .unwrap();

        let err = api
            .find_redeem(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchtowerError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_erc20_lock_filters_by_token() {
        let mut routes = vec![
            (
                format!(
                    "topic2={}&topic2_3_opr=and&topic3={}",
                    abi::address_topic(TOKEN),
                    abi::address_topic(PARTICIPANT)
                ),
                logs(LOCK_TX),
            ),
            (
                format!("eth_getTransactionByHash&txhash={}", LOCK_TX),
                rpc_tx(erc20_initiate(&secret_hash(), REFUND_TS, 5_000_000), "0x0"),
            ),
        ];
        routes.extend(common_routes());
        let base = serve(routes).await;

        let mut usdt = currency("USDT", CurrencyFamily::Erc20, dec!(1000000));
        usdt.token_contract = Some(TOKEN.into());
        let api = EtherScanApi::new(
            &usdt,
            &config(&base),
            IndexerClient::new(reqwest::Client::new(), &base, Arc::new(RequestLimiter::disabled())),
        )
        .unwrap();

        let lock = api
            .find_lock(&query(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.amount(&query()), dec!(5000000));
    }

    #[test]
    fn test_erc20_requires_token_contract() {
        let result = EtherScanApi::new(
            &currency("USDT", CurrencyFamily::Erc20, dec!(1000000)),
            &config("https://api.etherscan.io/"),
            IndexerClient::new(
                reqwest::Client::new(),
                "https://api.etherscan.io/",
                Arc::new(RequestLimiter::disabled()),
            ),
        );
        assert!(matches!(result, Err(WatchtowerError::Config(_))));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_i64("0x10").unwrap(), 16);
        assert!(parse_hex_i64("0xzz").is_err());
        assert_eq!(parse_hex_u256("0x").unwrap(), U256::ZERO);
        assert_eq!(
            parse_hex_u256("0xde0b6b3a7640000").unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }
}
