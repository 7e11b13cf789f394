//! Routing façade over the per-currency watchers

use super::{BlockchainApi, ChainTransaction, ChainWatcher, HtlcQuery, LimiterRegistry, SharedApi};
use crate::config::Settings;
use crate::currency::Currencies;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Dispatches every lookup to the watcher registered for the currency
#[derive(Clone, Default)]
pub struct BlockchainService {
    watchers: HashMap<String, SharedApi>,
}

impl BlockchainService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one watcher per configured currency
    pub fn from_settings(settings: &Settings, currencies: &Currencies) -> WatchtowerResult<Self> {
        let limiters = LimiterRegistry::new();
        let mut service = Self::new();

        for (name, config) in &settings.currencies {
            let currency = currencies.get(name)?;
            let watcher = ChainWatcher::from_config(currency, config, &limiters)?;
            info!("Registered watcher {} for {}", watcher.name(), name);
            service.register(name, Arc::new(watcher));
        }

        Ok(service)
    }

    pub fn register(&mut self, currency: &str, api: SharedApi) {
        self.watchers.insert(currency.to_string(), api);
    }

    pub fn currencies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.watchers.keys().cloned().collect();
        names.sort();
        names
    }

    fn watcher(&self, currency: &str) -> WatchtowerResult<&SharedApi> {
        self.watchers
            .get(currency)
            .ok_or_else(|| WatchtowerError::unknown_currency(currency))
    }

    pub async fn get_transaction(
        &self,
        currency: &str,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let result = self.watcher(currency)?.get_transaction(tx_id, cancel).await;
        record(currency, "get_transaction", &result, Option::is_some);
        result
    }

    pub async fn find_lock(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let result = self.watcher(&query.currency)?.find_lock(query, cancel).await;
        record(&query.currency, "find_lock", &result, Option::is_some);
        result
    }

    pub async fn find_additional_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        let result = self
            .watcher(&query.currency)?
            .find_additional_locks(query, cancel)
            .await;
        record(&query.currency, "find_additional_locks", &result, |txs| !txs.is_empty());
        result
    }

    pub async fn find_redeem(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let result = self.watcher(&query.currency)?.find_redeem(query, cancel).await;
        record(&query.currency, "find_redeem", &result, Option::is_some);
        result
    }

    pub async fn find_refund(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<ChainTransaction>> {
        let result = self.watcher(&query.currency)?.find_refund(query, cancel).await;
        record(&query.currency, "find_refund", &result, Option::is_some);
        result
    }

    /// Lock as a sequence, empty when not found
    pub async fn find_locks(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        Ok(self.find_lock(query, cancel).await?.into_iter().collect())
    }

    pub async fn find_redeems(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        Ok(self.find_redeem(query, cancel).await?.into_iter().collect())
    }

    pub async fn find_refunds(
        &self,
        query: &HtlcQuery,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Vec<ChainTransaction>> {
        Ok(self.find_refund(query, cancel).await?.into_iter().collect())
    }
}

fn record<T>(currency: &str, operation: &str, result: &WatchtowerResult<T>, found: impl Fn(&T) -> bool) {
    let outcome = match result {
        Ok(value) if found(value) => "found",
        Ok(_) => "absent",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(_) => "error",
    };
    metrics::record_watcher_request(currency, operation, outcome);
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::chain::MockBlockchainApi;

    /// Service routing the given currencies to mocked watchers
    pub fn service(watchers: Vec<(&str, MockBlockchainApi)>) -> BlockchainService {
        let mut service = BlockchainService::new();
        for (currency, api) in watchers {
            service.register(currency, Arc::new(api));
        }
        service
    }
}
