//! Upstream swap source
//!
//! A discovery feed only: remote statuses beyond Created/Involved are never
//! trusted and collapse to Involved until the chains confirm them locally.

use crate::chain::http::{build_client, IndexerClient};
use crate::chain::RequestLimiter;
use crate::config::UpstreamConfig;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::repository::DataRepository;
use crate::swap::{Party, PartyStatus, Requisites, Side, Swap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Enum sent either by name or by declaration index
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireEnum {
    Index(i64),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRequisites {
    secret_hash: Option<String>,
    receiving_address: Option<String>,
    refund_address: Option<String>,
    #[serde(default)]
    reward_for_redeem: Decimal,
    #[serde(default)]
    lock_time: u64,
    watch_tower: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteParty {
    requisites: Option<RemoteRequisites>,
    side: WireEnum,
    status: WireEnum,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSwap {
    id: i64,
    symbol: String,
    time_stamp: DateTime<Utc>,
    price: Decimal,
    qty: Decimal,
    secret_hash: Option<String>,
    initiator: RemoteParty,
    acceptor: RemoteParty,
    base_currency_contract: Option<String>,
    quote_currency_contract: Option<String>,
    #[serde(default)]
    old_id: i64,
}

impl RemoteParty {
    fn into_party(self) -> WatchtowerResult<Party> {
        let side = match &self.side {
            WireEnum::Index(i) => Side::parse(&i.to_string()),
            WireEnum::Name(name) => Side::parse(name),
        }
        .ok_or_else(|| WatchtowerError::Decode(format!("unknown side {:?}", self.side)))?;

        let status = match &self.status {
            WireEnum::Index(i) => PartyStatus::from_index(*i),
            WireEnum::Name(name) => PartyStatus::parse(name),
        }
        .ok_or_else(|| WatchtowerError::Decode(format!("unknown status {:?}", self.status)))?;

        let mut party = Party::new(side, collapse(status));
        party.requisites = self.requisites.map(|r| Requisites {
            secret_hash: r.secret_hash,
            receiving_address: r.receiving_address,
            refund_address: r.refund_address,
            reward_for_redeem: r.reward_for_redeem,
            lock_time: r.lock_time,
            watch_tower: r.watch_tower,
        });
        Ok(party)
    }
}

impl RemoteSwap {
    fn into_swap(self) -> WatchtowerResult<Swap> {
        Ok(Swap {
            id: self.id,
            symbol: self.symbol,
            timestamp: self.time_stamp,
            price: self.price,
            qty: self.qty,
            secret: None,
            secret_hash: self.secret_hash,
            initiator: self.initiator.into_party()?,
            acceptor: self.acceptor.into_party()?,
            base_currency_contract: self.base_currency_contract,
            quote_currency_contract: self.quote_currency_contract,
            old_id: self.old_id,
        })
    }
}

/// Only "requisites exist" is taken from the remote side
fn collapse(status: PartyStatus) -> PartyStatus {
    match status {
        PartyStatus::Created | PartyStatus::Involved => status,
        _ => PartyStatus::Involved,
    }
}

/// Client of the upstream tracker endpoint
pub struct UpstreamSource {
    client: IndexerClient,
    api_token: String,
    limit: u32,
}

impl UpstreamSource {
    pub fn from_config(config: &UpstreamConfig) -> WatchtowerResult<Self> {
        Ok(Self {
            client: IndexerClient::new(
                build_client()?,
                &config.api_url,
                Arc::new(RequestLimiter::disabled()),
            ),
            api_token: config.api_token.clone(),
            limit: config.limit,
        })
    }

    /// Active swaps, newest first as the endpoint returns them
    pub async fn fetch_active(&self, cancel: &CancellationToken) -> WatchtowerResult<Vec<Swap>> {
        let path = format!(
            "v1/tracker/swaps?active=true&limit={}&apiToken={}",
            self.limit, self.api_token
        );

        let remote: Vec<RemoteSwap> = self.client.get_json(&path, cancel).await?.unwrap_or_default();

        Ok(remote
            .into_iter()
            .filter_map(|swap| {
                let id = swap.id;
                swap.into_swap()
                    .map_err(|e| warn!("[swap {}] skipping upstream swap: {}", id, e))
                    .ok()
            })
            .collect())
    }
}

/// Store the swaps not seen yet, oldest first. Returns the advanced cursor and
/// the number of swaps added.
pub async fn import_swaps(
    repository: &dyn DataRepository,
    swaps: Vec<Swap>,
    mut cursor: i64,
) -> WatchtowerResult<(i64, usize)> {
    let mut added = 0;

    for swap in swaps.into_iter().rev() {
        if swap.id < cursor {
            continue;
        }
        cursor = cursor.max(swap.id);

        if repository.get_swap(swap.id).await?.is_some() {
            continue;
        }

        if repository.add_swap(&swap).await? {
            debug!("[swap {}] imported from upstream", swap.id);
            added += 1;
        }
    }

    if added > 0 {
        info!("Imported {} swaps from upstream", added);
    }
    Ok((cursor, added))
}
