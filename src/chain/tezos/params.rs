//! Michelson parameter trees of the Tezos swap contracts
//!
//! Each entrypoint nests the same logical fields at a different depth. Every
//! lookup goes through JSON pointers so a missing branch is a non-match.

use crate::chain::transaction::{secret_matches, TezosAsset, TezosPayload};

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

fn entrypoint(tx: &TezosPayload) -> Option<(&str, &Value)> {
    let params = tx.parameters.as_ref()?;
    Some((params.pointer("/entrypoint")?.as_str()?, params))
}

fn bytes<'a>(node: &'a Value, path: &str) -> Option<&'a str> {
    node.pointer(&format!("{}/bytes", path))?.as_str()
}

fn string<'a>(node: &'a Value, path: &str) -> Option<&'a str> {
    node.pointer(&format!("{}/string", path))?.as_str()
}

fn int(node: &Value, path: &str) -> Option<i128> {
    match node.pointer(&format!("{}/int", path))? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().map(i128::from),
        _ => None,
    }
}

fn prim<'a>(node: &'a Value, path: &str) -> Option<&'a str> {
    node.pointer(&format!("{}/prim", path))?.as_str()
}

fn same_hex(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x")
        .eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

/// Mutez for tez, token units from the initiate arguments for FA1.2
pub fn amount(tx: &TezosPayload) -> Decimal {
    match tx.asset {
        TezosAsset::Tez => tx.amount,
        TezosAsset::Fa12 => {
            let root = match entrypoint(tx) {
                Some(("default", params)) => params.pointer("/value/args/0/args/0"),
                Some(("initiate", params)) => params.pointer("/value"),
                _ => None,
            };

            root.and_then(|root| root.pointer("/args/1/args/1/int"))
                .and_then(|v| match v {
                    Value::String(s) => Decimal::from_str(s).ok(),
                    Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                    _ => None,
                })
                .unwrap_or(Decimal::ZERO)
        }
    }
}

/// Bytes passed to a redeem entrypoint, unverified
pub fn redeem_secret(tx: &TezosPayload) -> Option<Vec<u8>> {
    let (entrypoint, params) = entrypoint(tx)?;
    let secret = match (tx.asset, entrypoint) {
        (_, "default") => bytes(params, "/value/args/0/args/0"),
        (TezosAsset::Tez, "withdraw") => bytes(params, "/value/args/0"),
        (_, "redeem") => bytes(params, "/value"),
        _ => None,
    }?;
    hex::decode(secret).ok()
}

/// Initiate call matching the secret hash, participant, refund time and, for
/// FA1.2, the token contract
pub fn is_swap_init(
    tx: &TezosPayload,
    secret_hash: &str,
    participant: &str,
    refund_timestamp: i64,
    token_contract: Option<&str>,
) -> bool {
    let Some((entrypoint, params)) = entrypoint(tx) else {
        return false;
    };

    let root = match (tx.asset, entrypoint) {
        (_, "default") => params.pointer("/value/args/0/args/0"),
        (TezosAsset::Tez, "fund") => params.pointer("/value/args/0"),
        (_, "initiate") => params.pointer("/value"),
        _ => None,
    };
    let Some(root) = root else {
        return false;
    };

    let refund_timestamp = i128::from(refund_timestamp);
    match tx.asset {
        TezosAsset::Tez => {
            bytes(root, "/args/1/args/0/args/0").is_some_and(|h| same_hex(h, secret_hash))
                && int(root, "/args/1/args/0/args/1").is_some_and(|t| t >= refund_timestamp)
                && string(root, "/args/0") == Some(participant)
        }
        TezosAsset::Fa12 => {
            bytes(root, "/args/0/args/0/args/0").is_some_and(|h| same_hex(h, secret_hash))
                && string(root, "/args/0/args/0/args/1") == Some(participant)
                && token_contract.is_some_and(|token| string(root, "/args/1/args/0") == Some(token))
                && int(root, "/args/0/args/1/args/1").is_some_and(|t| t >= refund_timestamp)
        }
    }
}

/// Top-up of an existing tez HTLC
pub fn is_swap_add(tx: &TezosPayload, secret_hash: &str) -> bool {
    if tx.asset != TezosAsset::Tez {
        return false;
    }

    let Some((entrypoint, params)) = entrypoint(tx) else {
        return false;
    };

    let hash = match entrypoint {
        "default" if prim(params, "/value") == Some("Left") => bytes(params, "/value/args/0/args/0"),
        "fund" => bytes(params, "/value/args/0"),
        "add" => bytes(params, "/value"),
        _ => None,
    };

    hash.is_some_and(|h| same_hex(h, secret_hash))
}

pub fn is_swap_redeem(tx: &TezosPayload, secret_hash: &str) -> bool {
    redeem_secret(tx).is_some_and(|secret| secret_matches(&secret, secret_hash))
}

pub fn is_swap_refund(tx: &TezosPayload, secret_hash: &str) -> bool {
    let Some((entrypoint, params)) = entrypoint(tx) else {
        return false;
    };

    let hash = match (tx.asset, entrypoint) {
        (TezosAsset::Tez, "default") if prim(params, "/value") == Some("Right") => {
            bytes(params, "/value/args/0/args/0")
        }
        (TezosAsset::Tez, "withdraw") => bytes(params, "/value/args/0"),
        (TezosAsset::Fa12, "default") => bytes(params, "/value/args/0"),
        (_, "refund") => bytes(params, "/value"),
        _ => None,
    };

    hash.is_some_and(|h| same_hex(h, secret_hash))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub const PARTICIPANT: &str = "tz1aKTCbAUuea2RV9kxqRVRg3HT7f1RKnp6a";
    pub const TOKEN: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";

    pub fn payload(asset: TezosAsset, parameters: Value) -> TezosPayload {
        TezosPayload {
            asset,
            target: None,
            amount: Decimal::from(1_000_000),
            parameters: Some(parameters),
        }
    }

    /// `initiate` value of the tez contract
    pub fn tez_initiate(secret_hash: &str, refund_timestamp: i64) -> Value {
        json!({
            "prim": "Pair",
            "args": [
                { "string": PARTICIPANT },
                {
                    "prim": "Pair",
                    "args": [
                        {
                            "prim": "Pair",
                            "args": [
                                { "bytes": secret_hash },
                                { "int": refund_timestamp.to_string() }
                            ]
                        },
                        { "int": "0" }
                    ]
                }
            ]
        })
    }

    /// `initiate` value of the FA1.2 contract
    pub fn fa12_initiate(secret_hash: &str, refund_timestamp: i64, amount: u64) -> Value {
        json!({
            "prim": "Pair",
            "args": [
                {
                    "prim": "Pair",
                    "args": [
                        {
                            "prim": "Pair",
                            "args": [{ "bytes": secret_hash }, { "string": PARTICIPANT }]
                        },
                        {
                            "prim": "Pair",
                            "args": [{ "int": "0" }, { "int": refund_timestamp.to_string() }]
                        }
                    ]
                },
                {
                    "prim": "Pair",
                    "args": [{ "string": TOKEN }, { "int": amount.to_string() }]
                }
            ]
        })
    }

    /// Wrap an entrypoint value as the `default` entrypoint, `Left`/`Right` branch first
    pub fn default_entry(branch: &str, inner: Value) -> Value {
        json!({
            "entrypoint": "default",
            "value": { "prim": branch, "args": [{ "prim": "Left", "args": [inner] }] }
        })
    }

    pub fn entry(name: &str, value: Value) -> Value {
        json!({ "entrypoint": name, "value": value })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::swap::fixtures::{secret_hash, SECRET};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const REFUND: i64 = 1_600_036_000;

    #[test]
    fn test_tez_init_by_entrypoint() {
        let init = tez_initiate(&secret_hash(), REFUND);

        let direct = payload(TezosAsset::Tez, entry("initiate", init.clone()));
        assert!(is_swap_init(&direct, &secret_hash(), PARTICIPANT, REFUND, None));
        assert!(!is_swap_init(&direct, &secret_hash(), PARTICIPANT, REFUND + 1, None));
        assert!(!is_swap_init(&direct, &"00".repeat(32), PARTICIPANT, REFUND, None));
        assert!(!is_swap_init(&direct, &secret_hash(), "tz1other", REFUND, None));

        let fund = payload(
            TezosAsset::Tez,
            entry("fund", json!({ "prim": "Left", "args": [init.clone()] })),
        );
        assert!(is_swap_init(&fund, &secret_hash(), PARTICIPANT, REFUND, None));

        let default = payload(TezosAsset::Tez, default_entry("Left", init));
        assert!(is_swap_init(&default, &secret_hash(), PARTICIPANT, REFUND, None));
    }

    #[test]
    fn test_missing_branches_do_not_match() {
        let broken = payload(TezosAsset::Tez, entry("initiate", json!({ "prim": "Unit" })));
        assert!(!is_swap_init(&broken, &secret_hash(), PARTICIPANT, REFUND, None));
        assert!(!is_swap_redeem(&broken, &secret_hash()));
        assert!(!is_swap_refund(&broken, &secret_hash()));

        let no_params = TezosPayload {
            parameters: None,
            ..payload(TezosAsset::Tez, Value::Null)
        };
        assert!(!is_swap_add(&no_params, &secret_hash()));
        assert_eq!(redeem_secret(&no_params), None);
    }

    #[test]
    fn test_tez_add_redeem_refund() {
        let add = payload(TezosAsset::Tez, entry("add", json!({ "bytes": secret_hash() })));
        assert!(is_swap_add(&add, &secret_hash()));

        let left = payload(
            TezosAsset::Tez,
            json!({
                "entrypoint": "default",
                "value": { "prim": "Left", "args": [{ "prim": "Right", "args": [{ "bytes": secret_hash() }] }] }
            }),
        );
        assert!(is_swap_add(&left, &secret_hash()));

        let redeem = payload(TezosAsset::Tez, entry("redeem", json!({ "bytes": SECRET })));
        assert!(is_swap_redeem(&redeem, &secret_hash()));
        assert!(!is_swap_refund(&redeem, &secret_hash()));

        let withdraw = payload(
            TezosAsset::Tez,
            entry("withdraw", json!({ "prim": "Left", "args": [{ "bytes": SECRET }] })),
        );
        assert_eq!(redeem_secret(&withdraw), Some(hex::decode(SECRET).unwrap()));

        let refund = payload(TezosAsset::Tez, entry("refund", json!({ "bytes": secret_hash() })));
        assert!(is_swap_refund(&refund, &secret_hash()));
        assert!(!is_swap_redeem(&refund, &secret_hash()));

        let default_refund = payload(
            TezosAsset::Tez,
            default_entry("Right", json!({ "bytes": secret_hash() })),
        );
        assert!(is_swap_refund(&default_refund, &secret_hash()));

        let default_left = payload(
            TezosAsset::Tez,
            default_entry("Left", json!({ "bytes": secret_hash() })),
        );
        assert!(!is_swap_refund(&default_left, &secret_hash()));
    }

    #[test]
    fn test_fa12_init_and_amount() {
        let init = payload(
            TezosAsset::Fa12,
            entry("initiate", fa12_initiate(&secret_hash(), REFUND, 4_200)),
        );

        assert!(is_swap_init(&init, &secret_hash(), PARTICIPANT, REFUND, Some(TOKEN)));
        assert!(!is_swap_init(&init, &secret_hash(), PARTICIPANT, REFUND, Some("KT1other")));
        assert!(!is_swap_init(&init, &secret_hash(), PARTICIPANT, REFUND, None));
        assert!(!is_swap_init(&init, &secret_hash(), PARTICIPANT, REFUND + 1, Some(TOKEN)));
        assert_eq!(amount(&init), dec!(4200));

        let default = payload(
            TezosAsset::Fa12,
            default_entry("Left", fa12_initiate(&secret_hash(), REFUND, 7)),
        );
        assert_eq!(amount(&default), dec!(7));
        assert!(!is_swap_add(&default, &secret_hash()));
    }

    #[test]
    fn test_fa12_redeem_and_refund() {
        let redeem = payload(TezosAsset::Fa12, entry("redeem", json!({ "bytes": SECRET })));
        assert!(is_swap_redeem(&redeem, &secret_hash()));

        let withdraw = payload(TezosAsset::Fa12, entry("withdraw", json!({ "args": [{ "bytes": SECRET }] })));
        assert_eq!(redeem_secret(&withdraw), None);

        let refund = payload(
            TezosAsset::Fa12,
            entry("default", json!({ "prim": "Right", "args": [{ "bytes": secret_hash() }] })),
        );
        assert!(is_swap_refund(&refund, &secret_hash()));
    }

    #[test]
    fn test_tez_amount_is_operation_amount() {
        let tx = payload(TezosAsset::Tez, entry("initiate", tez_initiate(&secret_hash(), REFUND)));
        assert_eq!(amount(&tx), dec!(1000000));
    }
}
