//! In-memory chain transactions with their chain-specific payloads

use super::evm::abi;
use super::tezos::params;
use super::utxo::script;
use super::HtlcQuery;
use crate::currency::UtxoNetwork;
use crate::swap::{Transaction, TransactionStatus};

use alloy_primitives::U256;
use bitcoin::hashes::{sha256d, Hash};
use rust_decimal::Decimal;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainTransaction {
    pub currency: String,
    pub tx_id: String,
    pub block_height: i64,
    pub confirmations: i64,
    pub status: TransactionStatus,
    pub payload: ChainPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainPayload {
    Utxo(UtxoPayload),
    Evm(EvmPayload),
    Tezos(TezosPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtxoPayload {
    pub network: UtxoNetwork,
    pub inputs: Vec<UtxoInput>,
    pub outputs: Vec<UtxoOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtxoInput {
    pub index: u32,
    pub prev_tx_id: String,
    pub output_index: u32,
    /// Hex encoded signature script
    pub script_sig: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtxoOutput {
    pub index: u32,
    /// Satoshi
    pub value: u64,
    /// Hex encoded output script
    pub script_pub_key: String,
    pub spent_tx_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmAsset {
    Ether,
    Erc20,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvmPayload {
    pub asset: EvmAsset,
    pub from: String,
    pub to: String,
    /// 0x prefixed call data
    pub input: String,
    /// Wei
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TezosAsset {
    Tez,
    Fa12,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TezosPayload {
    pub asset: TezosAsset,
    pub target: Option<String>,
    /// Mutez
    pub amount: Decimal,
    pub parameters: Option<Value>,
}

impl ChainTransaction {
    pub fn is_confirmed(&self) -> bool {
        match &self.payload {
            ChainPayload::Utxo(_) => self.confirmations >= 1,
            ChainPayload::Evm(_) | ChainPayload::Tezos(_) => {
                self.status == TransactionStatus::Confirmed
            }
        }
    }

    /// Amount locked by this transaction for the queried swap, in smallest units
    pub fn amount(&self, query: &HtlcQuery) -> Decimal {
        match &self.payload {
            ChainPayload::Utxo(utxo) => {
                let sats: u64 = utxo
                    .outputs
                    .iter()
                    .filter(|o| script::is_swap_payment_hex(&o.script_pub_key, query, utxo.network))
                    .map(|o| o.value)
                    .sum();
                Decimal::from(sats)
            }
            ChainPayload::Evm(evm) => abi::amount(evm),
            ChainPayload::Tezos(tezos) => params::amount(tezos),
        }
    }

    /// Secret revealed by a redeem, verified against the secret hash
    pub fn secret(&self, secret_hash: &str, secret_size: usize) -> Option<String> {
        let secret = match &self.payload {
            ChainPayload::Utxo(utxo) => script::extract_secret(utxo, secret_hash, secret_size),
            ChainPayload::Evm(evm) => abi::redeem_secret(evm),
            ChainPayload::Tezos(tezos) => params::redeem_secret(tezos),
        }?;

        secret_matches(&secret, secret_hash).then(|| hex::encode(secret))
    }

    /// Lossy projection to the persisted record
    pub fn to_record(&self, id: i64) -> Transaction {
        Transaction {
            id,
            currency: self.currency.clone(),
            tx_id: self.tx_id.clone(),
            block_height: self.block_height,
            confirmations: self.confirmations,
            status: self.record_status(),
        }
    }

    /// UTXO indexers have no status field; a mined transaction is confirmed
    fn record_status(&self) -> TransactionStatus {
        match &self.payload {
            ChainPayload::Utxo(_) if self.confirmations >= 1 => TransactionStatus::Confirmed,
            ChainPayload::Utxo(_) => TransactionStatus::Pending,
            _ => self.status,
        }
    }

    pub fn utxo(&self) -> Option<&UtxoPayload> {
        match &self.payload {
            ChainPayload::Utxo(utxo) => Some(utxo),
            _ => None,
        }
    }
}

/// Double sha256 of the secret equals the hex secret hash
pub fn secret_matches(secret: &[u8], secret_hash: &str) -> bool {
    let hash = sha256d::Hash::hash(secret).to_byte_array();
    hex::encode(hash).eq_ignore_ascii_case(secret_hash.trim_start_matches("0x"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures::{secret_hash, SECRET};

    #[test]
    fn test_secret_matches() {
        let secret = hex::decode(SECRET).unwrap();
        assert!(secret_matches(&secret, &secret_hash()));
        assert!(secret_matches(&secret, &secret_hash().to_uppercase()));
        assert!(!secret_matches(&secret[1..], &secret_hash()));
    }

    #[test]
    fn test_utxo_record_status_follows_confirmations() {
        let tx = ChainTransaction {
            currency: "BTC".into(),
            tx_id: "ab".into(),
            block_height: 0,
            confirmations: 0,
            status: TransactionStatus::Pending,
            payload: ChainPayload::Utxo(UtxoPayload {
                network: UtxoNetwork::BITCOIN,
                inputs: vec![],
                outputs: vec![],
            }),
        };
        assert!(!tx.is_confirmed());
        assert_eq!(tx.to_record(0).status, TransactionStatus::Pending);

        let mined = ChainTransaction {
            confirmations: 3,
            ..tx
        };
        assert!(mined.is_confirmed());
        assert_eq!(mined.to_record(7).status, TransactionStatus::Confirmed);
        assert_eq!(mined.to_record(7).id, 7);
    }
}
