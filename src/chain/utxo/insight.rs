//! Insight indexer (`api/tx/{id}`)

use crate::chain::http::IndexerClient;
use crate::chain::transaction::{ChainPayload, UtxoInput, UtxoOutput, UtxoPayload};
use crate::chain::ChainTransaction;
use crate::currency::{Currency, UtxoNetwork};
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::swap::TransactionStatus;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

const SATOSHI_PER_COIN: u64 = 100_000_000;

#[derive(Debug, Deserialize)]
struct InsightTx {
    #[serde(default)]
    blockheight: Option<i64>,
    #[serde(default)]
    confirmations: i64,
    #[serde(default)]
    vin: Vec<InsightInput>,
    #[serde(default)]
    vout: Vec<InsightOutput>,
}

#[derive(Debug, Deserialize)]
struct InsightInput {
    #[serde(default)]
    n: u32,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: u32,
    #[serde(default, rename = "scriptSig")]
    script_sig: Option<HexScript>,
}

#[derive(Debug, Deserialize)]
struct InsightOutput {
    #[serde(default)]
    n: u32,
    #[serde(default)]
    value: Value,
    #[serde(default, rename = "spentTxId")]
    spent_tx_id: Option<String>,
    #[serde(default, rename = "scriptPubKey")]
    script_pub_key: Option<HexScript>,
}

#[derive(Debug, Deserialize)]
struct HexScript {
    #[serde(default)]
    hex: String,
}

pub struct InsightApi {
    currency: String,
    network: UtxoNetwork,
    client: IndexerClient,
}

impl InsightApi {
    pub fn new(currency: &Currency, client: IndexerClient) -> Self {
        Self {
            currency: currency.name.clone(),
            network: currency.network,
            client,
        }
    }

    pub fn name(&self) -> String {
        format!("insight({})", self.client.base_uri())
    }

    pub async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let tx: Option<InsightTx> = self
            .client
            .get_json(&format!("api/tx/{}", tx_id), cancel)
            .await?;

        tx.map(|tx| self.to_chain_transaction(tx_id, tx)).transpose()
    }

    fn to_chain_transaction(&self, tx_id: &str, tx: InsightTx) -> WatchtowerResult<ChainTransaction> {
        let inputs = tx
            .vin
            .into_iter()
            .map(|i| UtxoInput {
                index: i.n,
                prev_tx_id: i.txid.unwrap_or_default(),
                output_index: i.vout,
                script_sig: i.script_sig.map(|s| s.hex).unwrap_or_default(),
            })
            .collect();

        let outputs = tx
            .vout
            .into_iter()
            .map(|o| {
                Ok(UtxoOutput {
                    index: o.n,
                    value: coins_to_satoshi(&o.value)?,
                    script_pub_key: o.script_pub_key.map(|s| s.hex).unwrap_or_default(),
                    spent_tx_id: o.spent_tx_id,
                })
            })
            .collect::<WatchtowerResult<Vec<_>>>()?;

        Ok(ChainTransaction {
            currency: self.currency.clone(),
            tx_id: tx_id.to_string(),
            block_height: tx.blockheight.unwrap_or(0).max(0),
            confirmations: tx.confirmations,
            status: if tx.confirmations >= 1 {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            },
            payload: ChainPayload::Utxo(UtxoPayload {
                network: self.network,
                inputs,
                outputs,
            }),
        })
    }
}

/// Insight reports output values in whole coins, as a number or a string
fn coins_to_satoshi(value: &Value) -> WatchtowerResult<u64> {
    let coins = match value {
        Value::Null => return Ok(0),
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
    .ok_or_else(|| WatchtowerError::Decode(format!("invalid output value {}", value)))?;

    (coins * Decimal::from(SATOSHI_PER_COIN))
        .round()
        .to_u64()
        .ok_or_else(|| WatchtowerError::Decode(format!("output value out of range {}", value)))
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
