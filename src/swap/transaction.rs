//! Persisted transaction records and their links to parties

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Confirmed => "Confirmed",
            TransactionStatus::Canceled => "Canceled",
        }
    }

    pub fn parse(s: &str) -> Option<TransactionStatus> {
        match s {
            "Pending" => Some(TransactionStatus::Pending),
            "Confirmed" => Some(TransactionStatus::Confirmed),
            "Canceled" => Some(TransactionStatus::Canceled),
            _ => None,
        }
    }
}

/// Canonical chain transaction record, shared between parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub currency: String,
    pub tx_id: String,
    pub block_height: i64,
    pub confirmations: i64,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyTransactionType {
    Lock,
    AdditionalLock,
    Redeem,
    Refund,
}

impl PartyTransactionType {
    pub const LOCKS: [PartyTransactionType; 2] =
        [PartyTransactionType::Lock, PartyTransactionType::AdditionalLock];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartyTransactionType::Lock => "Lock",
            PartyTransactionType::AdditionalLock => "AdditionalLock",
            PartyTransactionType::Redeem => "Redeem",
            PartyTransactionType::Refund => "Refund",
        }
    }

    pub fn parse(s: &str) -> Option<PartyTransactionType> {
        match s {
            "Lock" => Some(PartyTransactionType::Lock),
            "AdditionalLock" => Some(PartyTransactionType::AdditionalLock),
            "Redeem" => Some(PartyTransactionType::Redeem),
            "Refund" => Some(PartyTransactionType::Refund),
            _ => None,
        }
    }

    pub fn is_lock(&self) -> bool {
        Self::LOCKS.contains(self)
    }
}

impl fmt::Display for PartyTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join row between a party and a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyTransaction {
    pub id: i64,
    pub party_id: i64,
    pub transaction_id: i64,
    pub transaction: Transaction,
    #[serde(rename = "type")]
    pub kind: PartyTransactionType,
    /// Locked amount in the currency's smallest units, decimal string
    pub amount: String,
}

impl PartyTransaction {
    pub fn amount(&self) -> Decimal {
        self.amount.parse().unwrap_or_default()
    }
}
