//! Swap selection predicates shared by every repository backend

use super::{PartyStatus, Swap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFilter {
    /// Strictly greater id than the cursor
    IdAbove(i64),
    /// At least one party may still move
    Active,
    /// Both parties reached a final status
    Completed,
}

impl SwapFilter {
    pub fn matches(&self, swap: &Swap) -> bool {
        match self {
            SwapFilter::IdAbove(id) => swap.id > *id,
            SwapFilter::Active => is_active(swap.initiator.status, swap.acceptor.status),
            SwapFilter::Completed => !is_active(swap.initiator.status, swap.acceptor.status),
        }
    }
}

/// A swap abandoned after the initiator refunded before the acceptor joined is not active
pub fn is_active(initiator: PartyStatus, acceptor: PartyStatus) -> bool {
    (!initiator.is_final() || !acceptor.is_final())
        && !(initiator == PartyStatus::Refunded && acceptor == PartyStatus::Created)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct SwapQuery {
    pub filters: Vec<SwapFilter>,
    pub sort: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SwapQuery {
    pub fn active_since(id: i64) -> Self {
        Self {
            filters: vec![SwapFilter::IdAbove(id), SwapFilter::Active],
            ..Default::default()
        }
    }

    pub fn matches(&self, swap: &Swap) -> bool {
        self.filters.iter().all(|f| f.matches(swap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures;
    use chrono::Utc;

    #[test]
    fn test_active_predicate() {
        use PartyStatus::*;

        assert!(is_active(Initiated, Involved));
        assert!(is_active(Redeemed, Initiated));
        assert!(!is_active(Redeemed, Redeemed));
        assert!(!is_active(Jackpot, Lost));
        assert!(!is_active(Refunded, Created));
        assert!(is_active(Refunded, Involved));
    }

    #[test]
    fn test_query_matches() {
        let mut swap = fixtures::swap(Utc::now());
        swap.id = 10;

        assert!(SwapQuery::active_since(9).matches(&swap));
        assert!(!SwapQuery::active_since(10).matches(&swap));

        swap.initiator.status = PartyStatus::Redeemed;
        swap.acceptor.status = PartyStatus::Redeemed;
        assert!(!SwapQuery::active_since(0).matches(&swap));
        assert!(SwapFilter::Completed.matches(&swap));
    }
}
