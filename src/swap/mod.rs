//! Swap aggregate: a swap owns its initiator and acceptor parties
//!
//! Parties carry no reference back to their swap; the owning swap is only
//! reachable through the repository.

pub mod amount;
pub mod filter;
pub mod transaction;

pub use filter::{SortOrder, SwapFilter, SwapQuery};
pub use transaction::{PartyTransaction, PartyTransactionType, Transaction, TransactionStatus};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side of a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "Buy" | "buy" | "0" => Some(Side::Buy),
            "Sell" | "sell" | "1" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Party status, ordered along the swap lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartyStatus {
    /// Swap created, requisites not posted yet
    Created,
    /// Requisites posted
    Involved,
    /// Some funds locked, less than required
    PartiallyInitiated,
    /// Required amount locked and confirmed
    Initiated,
    /// Counterparty funds redeemed by this party
    Redeemed,
    /// Own funds refunded
    Refunded,
    /// Counterparty took both sides
    Lost,
    /// Party both redeemed and refunded
    Jackpot,
}

impl PartyStatus {
    pub const ALL: [PartyStatus; 8] = [
        PartyStatus::Created,
        PartyStatus::Involved,
        PartyStatus::PartiallyInitiated,
        PartyStatus::Initiated,
        PartyStatus::Redeemed,
        PartyStatus::Refunded,
        PartyStatus::Lost,
        PartyStatus::Jackpot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartyStatus::Created => "Created",
            PartyStatus::Involved => "Involved",
            PartyStatus::PartiallyInitiated => "PartiallyInitiated",
            PartyStatus::Initiated => "Initiated",
            PartyStatus::Redeemed => "Redeemed",
            PartyStatus::Refunded => "Refunded",
            PartyStatus::Lost => "Lost",
            PartyStatus::Jackpot => "Jackpot",
        }
    }

    pub fn parse(s: &str) -> Option<PartyStatus> {
        PartyStatus::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Numeric wire representation, declaration order
    pub fn from_index(index: i64) -> Option<PartyStatus> {
        usize::try_from(index)
            .ok()
            .and_then(|i| PartyStatus::ALL.get(i).copied())
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PartyStatus::Redeemed | PartyStatus::Refunded | PartyStatus::Lost | PartyStatus::Jackpot
        )
    }
}

impl fmt::Display for PartyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a party inside a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapParty {
    Initiator,
    Acceptor,
}

impl SwapParty {
    pub fn counter(&self) -> SwapParty {
        match self {
            SwapParty::Initiator => SwapParty::Acceptor,
            SwapParty::Acceptor => SwapParty::Initiator,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapParty::Initiator => "initiator",
            SwapParty::Acceptor => "acceptor",
        }
    }
}

impl fmt::Display for SwapParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requisites {
    pub secret_hash: Option<String>,
    pub receiving_address: Option<String>,
    pub refund_address: Option<String>,
    pub reward_for_redeem: Decimal,
    /// Lock duration in seconds, counted from the swap timestamp
    pub lock_time: u64,
    pub watch_tower: Option<String>,
}

impl Requisites {
    pub fn is_filled(&self) -> bool {
        self.receiving_address.is_some() || self.lock_time != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: i64,
    pub requisites: Option<Requisites>,
    pub side: Side,
    pub status: PartyStatus,
    #[serde(default)]
    pub transactions: Vec<PartyTransaction>,
}

impl Party {
    pub fn new(side: Side, status: PartyStatus) -> Self {
        Self {
            id: 0,
            requisites: None,
            side,
            status,
            transactions: Vec::new(),
        }
    }

    pub fn lock_time(&self) -> u64 {
        self.requisites.as_ref().map(|r| r.lock_time).unwrap_or(0)
    }

    pub fn reward_for_redeem(&self) -> Decimal {
        self.requisites
            .as_ref()
            .map(|r| r.reward_for_redeem)
            .unwrap_or_default()
    }

    pub fn transactions_of(
        &self,
        kinds: &[PartyTransactionType],
    ) -> impl Iterator<Item = &PartyTransaction> + '_ {
        let kinds = kinds.to_vec();
        self.transactions
            .iter()
            .filter(move |t| kinds.contains(&t.kind))
    }

    pub fn find_transaction(&self, tx_id: &str) -> Option<&PartyTransaction> {
        self.transactions
            .iter()
            .find(|t| t.transaction.tx_id.eq_ignore_ascii_case(tx_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub id: i64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub qty: Decimal,
    pub secret: Option<String>,
    pub secret_hash: Option<String>,
    pub initiator: Party,
    pub acceptor: Party,
    pub base_currency_contract: Option<String>,
    pub quote_currency_contract: Option<String>,
    pub old_id: i64,
}

impl Swap {
    pub fn party(&self, role: SwapParty) -> &Party {
        match role {
            SwapParty::Initiator => &self.initiator,
            SwapParty::Acceptor => &self.acceptor,
        }
    }

    pub fn party_mut(&mut self, role: SwapParty) -> &mut Party {
        match role {
            SwapParty::Initiator => &mut self.initiator,
            SwapParty::Acceptor => &mut self.acceptor,
        }
    }

    pub fn counter_party(&self, role: SwapParty) -> &Party {
        self.party(role.counter())
    }

    pub fn base_currency(&self) -> &str {
        base_currency(&self.symbol)
    }

    pub fn quote_currency(&self) -> &str {
        quote_currency(&self.symbol)
    }

    /// Currency the party locks and gives away
    pub fn sold_currency(&self, role: SwapParty) -> &str {
        sold_currency(&self.symbol, self.party(role).side)
    }

    /// Currency the party receives
    pub fn purchased_currency(&self, role: SwapParty) -> &str {
        purchased_currency(&self.symbol, self.party(role).side)
    }

    /// HTLC contract for a leg, if the currency is contract based
    pub fn contract_by_currency(&self, currency: &str) -> Option<&str> {
        if self.base_currency() == currency {
            self.base_currency_contract.as_deref()
        } else {
            self.quote_currency_contract.as_deref()
        }
    }

    /// At least one party has a full confirmed lock
    pub fn is_initiated(&self) -> bool {
        self.initiator.status >= PartyStatus::Initiated || self.acceptor.status >= PartyStatus::Initiated
    }

    /// Moment the party's lock becomes refundable, `MAX_UTC` when the lock
    /// time is out of range
    pub fn refund_time(&self, role: SwapParty) -> DateTime<Utc> {
        i64::try_from(self.party(role).lock_time())
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lock_time| self.timestamp.checked_add_signed(lock_time))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        let timeout = Duration::from_std(timeout).unwrap_or(Duration::MAX);
        self.age(now) >= timeout
    }
}

pub fn base_currency(symbol: &str) -> &str {
    symbol.split_once('/').map(|(b, _)| b).unwrap_or(symbol)
}

pub fn quote_currency(symbol: &str) -> &str {
    symbol.split_once('/').map(|(_, q)| q).unwrap_or(symbol)
}

pub fn sold_currency(symbol: &str, side: Side) -> &str {
    match side {
        Side::Buy => quote_currency(symbol),
        Side::Sell => base_currency(symbol),
    }
}

pub fn purchased_currency(symbol: &str, side: Side) -> &str {
    match side {
        Side::Buy => base_currency(symbol),
        Side::Sell => quote_currency(symbol),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_helpers() {
        assert_eq!(base_currency("ETH/BTC"), "ETH");
        assert_eq!(quote_currency("ETH/BTC"), "BTC");
        assert_eq!(sold_currency("ETH/BTC", Side::Buy), "BTC");
        assert_eq!(sold_currency("ETH/BTC", Side::Sell), "ETH");
        assert_eq!(purchased_currency("ETH/BTC", Side::Buy), "ETH");
        assert_eq!(purchased_currency("ETH/BTC", Side::Sell), "BTC");
    }

    #[test]
    fn test_status_ordering() {
        assert!(PartyStatus::Created < PartyStatus::Involved);
        assert!(PartyStatus::PartiallyInitiated < PartyStatus::Initiated);
        assert!(PartyStatus::Initiated < PartyStatus::Redeemed);
        assert!(PartyStatus::Refunded < PartyStatus::Lost);
        assert!(PartyStatus::Lost < PartyStatus::Jackpot);
        assert_eq!(PartyStatus::from_index(3), Some(PartyStatus::Initiated));
        assert_eq!(PartyStatus::parse("Jackpot"), Some(PartyStatus::Jackpot));
        assert_eq!(PartyStatus::from_index(8), None);
    }

    #[test]
    fn test_contract_by_currency() {
        let swap = fixtures::swap(Utc::now());
        assert_eq!(swap.sold_currency(SwapParty::Initiator), "ETH");
        assert_eq!(swap.sold_currency(SwapParty::Acceptor), "BTC");
        assert_eq!(
            swap.contract_by_currency("ETH"),
            Some("0xe9c251cbb4881f9e056e40135e7d3ea9a7d037df")
        );
        assert_eq!(swap.contract_by_currency("BTC"), None);
    }

    #[test]
    fn test_refund_time_and_timeout() {
        let now = Utc::now();
        let swap = fixtures::swap(now - Duration::hours(12));
        assert_eq!(
            swap.refund_time(SwapParty::Acceptor),
            swap.timestamp + Duration::seconds(18000)
        );
        assert!(swap.is_timed_out(now, std::time::Duration::from_secs(12 * 3600)));
        assert!(!swap.is_timed_out(now, std::time::Duration::from_secs(24 * 3600)));
        assert!(!swap.is_initiated());
    }

    #[test]
    fn test_refund_time_saturates_on_huge_lock_time() {
        let mut swap = fixtures::swap(Utc::now());
        if let Some(requisites) = swap.initiator.requisites.as_mut() {
            requisites.lock_time = 10_000_000_000_000_000;
        }
        assert_eq!(swap.refund_time(SwapParty::Initiator), DateTime::<Utc>::MAX_UTC);

        if let Some(requisites) = swap.acceptor.requisites.as_mut() {
            requisites.lock_time = u64::MAX;
        }
        assert_eq!(swap.refund_time(SwapParty::Acceptor), DateTime::<Utc>::MAX_UTC);
    }
}
