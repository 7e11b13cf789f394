//! Bitcoin-based watchers
//!
//! Address-scan indexers cannot enumerate HTLC funding transactions, so lock
//! lookups are unsupported here. Redeems and refunds are found by tracing the
//! outputs of an already known lock transaction to their spending inputs.

pub mod blockcypher;
pub mod insight;
pub mod script;

pub use blockcypher::BlockCypherApi;
pub use insight::InsightApi;

use super::{BlockchainApi, ChainTransaction, HtlcQuery};
use crate::error::{WatchtowerError, WatchtowerResult};

use async_trait::async_trait;
use script::SpendKind;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub enum UtxoApi {
    Insight(InsightApi),
    BlockCypher(BlockCypherApi),
}

impl UtxoApi {
    async fn find_spend(
        &self,
        query: &HtlcQuery,
        kind: SpendKind,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let Some(lock_tx_id) = query.lock_tx_id.as_deref() else {
            return Ok(None);
        };

        let Some(lock_tx) = self.get_transaction(lock_tx_id, cancel).await? else {
            return Ok(None);
        };

        let Some(lock) = lock_tx.utxo() else {
            return Ok(None);
        };

        let swap_outputs = lock
            .outputs
            .iter()
            .filter(|o| script::is_swap_payment_hex(&o.script_pub_key, query, lock.network));

        for output in swap_outputs {
            let Some(spent_tx_id) = output.spent_tx_id.as_deref() else {
                continue;
            };

            let Some(spent_tx) = self.get_transaction(spent_tx_id, cancel).await? else {
                continue;
            };

            let input = spent_tx.utxo().and_then(|spending| {
                spending.inputs.iter().find(|i| {
                    i.output_index == output.index && i.prev_tx_id.eq_ignore_ascii_case(lock_tx_id)
                })
            });

            let Some(input) = input else {
                continue;
            };

            if script::classify_spend_hex(&input.script_sig, &output.script_pub_key) == Some(kind) {
                debug!(
                    "{} output {}:{} spent by {} as {:?}",
                    lock_tx.currency, lock_tx_id, output.index, spent_tx.tx_id, kind
                );
                return Ok(Some(spent_tx));
            }
        }

        Ok(None)
    }

    fn not_supported(&self, operation: &str) -> WatchtowerError {
        WatchtowerError::NotSupported {
            provider: self.name(),
            operation: operation.to_string(),
        }
    }
}

#[async_trait]
impl BlockchainApi for UtxoApi {
    fn name(&self) -> String {
        match self {
            UtxoApi::Insight(api) => api.name(),
            UtxoApi::BlockCypher(api) => api.name(),
        }
    }

    async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        match self {
            UtxoApi::Insight(api) => api.get_transaction(tx_id, cancel).await,
            UtxoApi::BlockCypher(api) => api.get_transaction(tx_id, cancel).await,
        }
    }

    async fn find_lock(
        &self,
        _query: &HtlcQuery,
        _cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        Err(self.not_supported("find_lock"))
    }

    async fn find_additional_locks(
        &self,
        _query: &HtlcQuery,
        _cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        Err(self.not_supported("find_additional_locks"))
    }

    async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.find_spend(query, SpendKind::Redeem, cancel).await
    }

    async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        self.find_spend(query, SpendKind::Refund, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::script::fixtures::{receiver, redeem_sig, refund, refund_sig, HTLC_HEX, HTLC_P2SH_HEX};
    use super::script::script_from_hex;
    use super::*;
    use crate::chain::http::{fixtures::serve, IndexerClient};
    use crate::chain::limiter::RequestLimiter;
    use crate::config::CurrencyFamily;
    use crate::currency::fixtures::currency;
    use crate::currency::UtxoNetwork;
    use crate::swap::fixtures::{secret_hash, SECRET};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const LOCK_TX: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const SPEND_TX: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn query() -> HtlcQuery {
        HtlcQuery {
            currency: "BTC".into(),
            secret_hash: secret_hash(),
            contract_address: None,
            lock_tx_id: Some(LOCK_TX.into()),
            address: Some(receiver()),
            refund_address: Some(refund()),
            timestamp: 1_600_000_000,
            lock_time: 3600,
            secret_size: 32,
        }
    }

    fn redeem_script() -> bitcoin::ScriptBuf {
        script_from_hex(HTLC_HEX).unwrap()
    }

    fn lock_tx(spent_by: Option<&str>) -> Value {
        json!({
            "blockheight": 100,
            "confirmations": 2,
            "vin": [],
            "vout": [
                { "n": 0, "value": "0.1", "scriptPubKey": { "hex": "76a914" } },
                {
                    "n": 1,
                    "value": "0.01",
                    "spentTxId": spent_by,
                    "scriptPubKey": { "hex": HTLC_P2SH_HEX }
                }
            ]
        })
    }

    fn spend_tx(script_sig: &bitcoin::Script) -> Value {
        json!({
            "blockheight": 101,
            "confirmations": 1,
            "vin": [
                { "n": 0, "txid": LOCK_TX, "vout": 1, "scriptSig": { "hex": hex::encode(script_sig.as_bytes()) } }
            ],
            "vout": []
        })
    }

    async fn insight(routes: Vec<(String, Value)>) -> UtxoApi {
        let mut btc = currency("BTC", CurrencyFamily::Bitcoin, dec!(100000000));
        btc.network = UtxoNetwork::BITCOIN_TESTNET;
        let base = serve(routes).await;
        UtxoApi::Insight(InsightApi::new(
            &btc,
            IndexerClient::new(reqwest::Client::new(), &base, Arc::new(RequestLimiter::disabled())),
        ))
    }

    #[tokio::test]
    async fn test_redeem_traced_through_spent_output() {
        let secret = hex::decode(SECRET).unwrap();
        let api = insight(vec![
            (format!("api/tx/{}", LOCK_TX), lock_tx(Some(SPEND_TX))),
            (format!("api/tx/{}", SPEND_TX), spend_tx(&redeem_sig(&secret, &redeem_script()))),
        ])
        .await;
        let cancel = CancellationToken::new();

        let redeem = api.find_redeem(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(redeem.tx_id, SPEND_TX);
        assert_eq!(redeem.secret(&secret_hash(), 32), Some(SECRET.to_string()));

        assert!(api.find_refund(&query(), &cancel).await.unwrap().is_none());

        let lock = api.get_transaction(LOCK_TX, &cancel).await.unwrap().unwrap();
        assert_eq!(lock.amount(&query()), dec!(1000000));
    }

    #[tokio::test]
    async fn test_refund_traced_through_spent_output() {
        let api = insight(vec![
            (format!("api/tx/{}", LOCK_TX), lock_tx(Some(SPEND_TX))),
            (format!("api/tx/{}", SPEND_TX), spend_tx(&refund_sig(&redeem_script()))),
        ])
        .await;
        let cancel = CancellationToken::new();

        let refund = api.find_refund(&query(), &cancel).await.unwrap().unwrap();
        assert_eq!(refund.tx_id, SPEND_TX);
        assert!(api.find_redeem(&query(), &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unspent_or_unknown_lock_is_absent() {
        let api = insight(vec![(format!("api/tx/{}", LOCK_TX), lock_tx(None))]).await;
        let cancel = CancellationToken::new();

        assert!(api.find_redeem(&query(), &cancel).await.unwrap().is_none());

        let mut unknown = query();
        unknown.lock_tx_id = Some("33".repeat(32));
        assert!(api.find_refund(&unknown, &cancel).await.unwrap().is_none());

        let mut no_lock = query();
        no_lock.lock_tx_id = None;
        assert!(api.find_redeem(&no_lock, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_search_not_supported() {
        let api = insight(vec![]).await;
        let cancel = CancellationToken::new();

        assert!(matches!(
            api.find_lock(&query(), &cancel).await,
            Err(WatchtowerError::NotSupported { .. })
        ));
        assert!(matches!(
            api.find_additional_locks(&query(), &cancel).await,
            Err(WatchtowerError::NotSupported { .. })
        ));
    }
}
