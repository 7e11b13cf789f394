//! Currency registry: precision, chain family and network parameters

use crate::config::{CurrencyConfig, CurrencyFamily};
use crate::error::{WatchtowerError, WatchtowerResult};

use rust_decimal::Decimal;
use std::collections::HashMap;

/// Address version bytes of a bitcoin-based network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtxoNetwork {
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
}

impl UtxoNetwork {
    pub const BITCOIN: UtxoNetwork = UtxoNetwork {
        p2pkh_prefix: 0x00,
        p2sh_prefix: 0x05,
    };

    pub const BITCOIN_TESTNET: UtxoNetwork = UtxoNetwork {
        p2pkh_prefix: 0x6f,
        p2sh_prefix: 0xc4,
    };

    pub const LITECOIN: UtxoNetwork = UtxoNetwork {
        p2pkh_prefix: 0x30,
        p2sh_prefix: 0x32,
    };
}

#[derive(Debug, Clone)]
pub struct Currency {
    pub name: String,
    pub family: CurrencyFamily,
    pub digits_multiplier: Decimal,
    pub secret_size: usize,
    pub token_contract: Option<String>,
    pub network: UtxoNetwork,
}

impl Currency {
    pub fn from_config(name: &str, config: &CurrencyConfig) -> Self {
        Self {
            name: name.to_string(),
            family: config.family,
            digits_multiplier: config.digits_multiplier,
            secret_size: config.secret_size,
            token_contract: config.token_contract.clone(),
            network: UtxoNetwork {
                p2pkh_prefix: config.p2pkh_prefix,
                p2sh_prefix: config.p2sh_prefix,
            },
        }
    }

    pub fn is_bitcoin_based(&self) -> bool {
        self.family.is_bitcoin_based()
    }
}

/// Lookup of configured currencies by symbol
#[derive(Debug, Clone, Default)]
pub struct Currencies {
    by_name: HashMap<String, Currency>,
}

impl Currencies {
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            by_name: currencies
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> WatchtowerResult<&Currency> {
        self.by_name
            .get(name)
            .ok_or_else(|| WatchtowerError::unknown_currency(name))
    }

    pub fn is_bitcoin_based(&self, name: &str) -> WatchtowerResult<bool> {
        Ok(self.get(name)?.is_bitcoin_based())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn currency(name: &str, family: CurrencyFamily, multiplier: Decimal) -> Currency {
        Currency {
            name: name.to_string(),
            family,
            digits_multiplier: multiplier,
            secret_size: 32,
            token_contract: None,
            network: UtxoNetwork::BITCOIN,
        }
    }

    /// BTC, LTC, ETH and XTZ with production precision
    pub fn currencies() -> Currencies {
        let mut ltc = currency("LTC", CurrencyFamily::Bitcoin, dec!(100000000));
        ltc.network = UtxoNetwork::LITECOIN;

        Currencies::new([
            currency("BTC", CurrencyFamily::Bitcoin, dec!(100000000)),
            ltc,
            currency("ETH", CurrencyFamily::Ethereum, dec!(1000000000)),
            currency("XTZ", CurrencyFamily::Tezos, dec!(1000000)),
        ])
    }
}
