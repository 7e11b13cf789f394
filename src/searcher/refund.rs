use super::{htlc_query, TransactionSearcher};
use crate::error::WatchtowerResult;
use crate::swap::{PartyStatus, PartyTransactionType, Swap, SwapParty};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl TransactionSearcher {
    /// Whether `role` refunded its own lock. Never searches before the
    /// party's refund time.
    pub async fn find_refund_transactions(
        &self,
        swap: &Swap,
        role: SwapParty,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<bool> {
        let party = swap.party(role);
        let counter_party = swap.counter_party(role);

        if party.status == PartyStatus::Refunded
            || (party.status == PartyStatus::Jackpot && counter_party.status == PartyStatus::Lost)
        {
            return Ok(true);
        }

        if party.status == PartyStatus::Lost {
            return Ok(false);
        }

        if swap.refund_time(role) > Utc::now() {
            debug!("[swap {}] {} refund time not reached", swap.id, role);
            return Ok(false);
        }

        let query = htlc_query(swap, role, &self.currencies)?;
        debug!("[swap {}] searching {} refund on {}", swap.id, role, query.currency);

        let refunds = self.service.find_refunds(&query, cancel).await?;
        if refunds.is_empty() {
            debug!("[swap {}] no {} refund found yet", swap.id, role);
            return Ok(false);
        }

        let found: Vec<_> = refunds
            .iter()
            .cloned()
            .map(|tx| (tx, PartyTransactionType::Refund))
            .collect();
        self.upsert_transactions(party, &found, &query).await?;

        if !self.is_spent_by(swap, role, &refunds, &query, cancel).await? {
            return Ok(false);
        }

        let status = if matches!(party.status, PartyStatus::Redeemed | PartyStatus::Jackpot) {
            PartyStatus::Jackpot
        } else {
            PartyStatus::Refunded
        };
        self.settle(party, status, counter_party).await?;
        info!("[swap {}] {} is {}", swap.id, role, status);

        Ok(true)
    }
}
