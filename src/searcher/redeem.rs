use super::{htlc_query, TransactionSearcher};
use crate::error::WatchtowerResult;
use crate::swap::{PartyStatus, PartyTransactionType, Swap, SwapParty};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl TransactionSearcher {
    /// Whether `redeemer` redeemed the counterpart's lock, or can no longer
    /// do so. An accepted redeem also records the revealed secret.
    pub async fn find_redeem_transactions(
        &self,
        swap: &Swap,
        redeemer: SwapParty,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<bool> {
        let lock_role = redeemer.counter();
        let party = swap.party(lock_role);
        let counter_party = swap.party(redeemer);

        if counter_party.status == PartyStatus::Redeemed
            || (counter_party.status == PartyStatus::Jackpot && party.status == PartyStatus::Lost)
        {
            return Ok(true);
        }

        if matches!(party.status, PartyStatus::Refunded | PartyStatus::Jackpot)
            || counter_party.status == PartyStatus::Lost
        {
            return Ok(true);
        }

        let query = htlc_query(swap, lock_role, &self.currencies)?;
        debug!("[swap {}] searching {} redeem on {}", swap.id, redeemer, query.currency);

        let redeems = self.service.find_redeems(&query, cancel).await?;
        if redeems.is_empty() {
            debug!("[swap {}] no {} redeem found yet", swap.id, redeemer);
            return Ok(false);
        }

        let found: Vec<_> = redeems
            .iter()
            .cloned()
            .map(|tx| (tx, PartyTransactionType::Redeem))
            .collect();
        self.upsert_transactions(counter_party, &found, &query).await?;

        if !self.is_spent_by(swap, lock_role, &redeems, &query, cancel).await? {
            return Ok(false);
        }

        let status = if matches!(counter_party.status, PartyStatus::Refunded | PartyStatus::Jackpot) {
            PartyStatus::Jackpot
        } else {
            PartyStatus::Redeemed
        };
        self.settle(counter_party, status, party).await?;
        info!("[swap {}] {} is {}", swap.id, redeemer, status);

        if let Some(secret) = redeems[0].secret(&query.secret_hash, query.secret_size) {
            if self.repository.add_secret(swap.id, &secret).await? {
                info!("[swap {}] secret revealed by {}", swap.id, redeems[0].tx_id);
            }
        }

        Ok(true)
    }
}
