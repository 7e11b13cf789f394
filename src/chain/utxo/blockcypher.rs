//! BlockCypher indexer (`txs/{id}`), inputs and outputs paged 100 at a time

use crate::chain::http::IndexerClient;
use crate::chain::transaction::{ChainPayload, UtxoInput, UtxoOutput, UtxoPayload};
use crate::chain::ChainTransaction;
use crate::currency::{Currency, UtxoNetwork};
use crate::error::WatchtowerResult;
use crate::swap::TransactionStatus;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct BlockCypherTx {
    #[serde(default)]
    block_height: Option<i64>,
    #[serde(default)]
    confirmations: i64,
    #[serde(default)]
    inputs: Vec<BlockCypherInput>,
    #[serde(default)]
    outputs: Vec<BlockCypherOutput>,
}

#[derive(Debug, Deserialize)]
struct BlockCypherInput {
    #[serde(default)]
    prev_hash: Option<String>,
    #[serde(default)]
    output_index: u32,
    #[serde(default)]
    script: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockCypherOutput {
    /// Satoshi
    #[serde(default)]
    value: u64,
    #[serde(default)]
    spent_by: Option<String>,
    #[serde(default)]
    script: Option<String>,
}

pub struct BlockCypherApi {
    currency: String,
    network: UtxoNetwork,
    client: IndexerClient,
}

impl BlockCypherApi {
    pub fn new(currency: &Currency, client: IndexerClient) -> Self {
        Self {
            currency: currency.name.clone(),
            network: currency.network,
            client,
        }
    }

    pub fn name(&self) -> String {
        format!("blockcypher({})", self.client.base_uri())
    }

    pub async fn get_transaction(
        &self,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let mut result: Option<ChainTransaction> = None;
        let mut start = 0;

        loop {
            let path = format!(
                "txs/{}?limit={}&instart={}&outstart={}",
                tx_id, PAGE_LIMIT, start, start
            );

            let Some(page) = self.client.get_json::<BlockCypherTx>(&path, cancel).await? else {
                return Ok(None);
            };

            let last_page = page.inputs.len() < PAGE_LIMIT && page.outputs.len() < PAGE_LIMIT;
            result = Some(match result {
                None => self.to_chain_transaction(tx_id, page, start),
                Some(tx) => append_page(tx, page, start),
            });

            if last_page {
                return Ok(result);
            }

            start += PAGE_LIMIT;
        }
    }

    fn to_chain_transaction(&self, tx_id: &str, page: BlockCypherTx, start: usize) -> ChainTransaction {
        let tx = ChainTransaction {
            currency: self.currency.clone(),
            tx_id: tx_id.to_string(),
            block_height: page.block_height.unwrap_or(0).max(0),
            confirmations: page.confirmations,
            status: if page.confirmations >= 1 {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            },
            payload: ChainPayload::Utxo(UtxoPayload {
                network: self.network,
                inputs: Vec::new(),
                outputs: Vec::new(),
            }),
        };

        append_page(tx, page, start)
    }
}

/// Inputs and outputs are numbered by position across pages
fn append_page(mut tx: ChainTransaction, page: BlockCypherTx, start: usize) -> ChainTransaction {
    if let ChainPayload::Utxo(utxo) = &mut tx.payload {
        let base = start as u32;

        utxo.inputs.extend(page.inputs.into_iter().enumerate().map(|(n, i)| UtxoInput {
            index: base + n as u32,
            prev_tx_id: i.prev_hash.unwrap_or_default(),
            output_index: i.output_index,
            script_sig: i.script.unwrap_or_default(),
        }));

        utxo.outputs.extend(page.outputs.into_iter().enumerate().map(|(n, o)| UtxoOutput {
            index: base + n as u32,
            value: o.value,
            script_pub_key: o.script.unwrap_or_default(),
            spent_tx_id: o.spent_by,
        }));
    }

    tx
}
