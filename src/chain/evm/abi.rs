//! HTLC contract ABI: event topics and call input decoding

use crate::chain::transaction::{EvmAsset, EvmPayload};

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use rust_decimal::Decimal;

sol! {
    interface EthSwap {
        event Initiated(
            bytes32 indexed hashed_secret,
            address indexed participant,
            address initiator,
            address watcher,
            uint256 refund_timestamp,
            uint256 watcher_deadline,
            uint256 value,
            uint256 payoff
        );
        event Added(bytes32 indexed hashed_secret, address initiator, uint256 value);
        event Redeemed(bytes32 indexed hashed_secret, bytes32 secret);
        event Refunded(bytes32 indexed hashed_secret);

        function initiate(
            bytes32 hashed_secret,
            address participant,
            address watcher,
            uint256 refund_timestamp,
            bool watcher_for_redeem,
            uint256 payoff
        ) external payable;
        function add(bytes32 hashed_secret) external payable;
        function redeem(bytes32 hashed_secret, bytes32 secret) external;
        function refund(bytes32 hashed_secret) external;
    }
}

sol! {
    interface Erc20Swap {
        event Initiated(
            bytes32 indexed hashed_secret,
            address indexed token,
            address indexed participant,
            address initiator,
            uint256 refund_timestamp,
            uint256 countdown,
            uint256 value,
            uint256 redeem_fee
        );
        event Added(bytes32 indexed hashed_secret, address initiator, uint256 value);
        event Redeemed(bytes32 indexed hashed_secret, bytes32 secret);
        event Refunded(bytes32 indexed hashed_secret);

        function initiate(
            bytes32 hashed_secret,
            address token,
            address participant,
            uint256 refund_timestamp,
            uint256 countdown,
            uint256 value,
            uint256 redeem_fee,
            bool active
        ) external;
        function add(bytes32 hashed_secret, uint256 value) external;
        function redeem(bytes32 hashed_secret, bytes32 secret) external;
        function refund(bytes32 hashed_secret) external;
    }
}

/// Gwei per wei, as a decimal scale
const GWEI_SCALE: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapEvent {
    Initiated,
    Added,
    Redeemed,
    Refunded,
}

/// 0x prefixed topic0 of a swap event
pub fn event_topic(asset: EvmAsset, event: SwapEvent) -> String {
    let hash = match (asset, event) {
        (EvmAsset::Ether, SwapEvent::Initiated) => EthSwap::Initiated::SIGNATURE_HASH,
        (EvmAsset::Ether, SwapEvent::Added) => EthSwap::Added::SIGNATURE_HASH,
        (EvmAsset::Ether, SwapEvent::Redeemed) => EthSwap::Redeemed::SIGNATURE_HASH,
        (EvmAsset::Ether, SwapEvent::Refunded) => EthSwap::Refunded::SIGNATURE_HASH,
        (EvmAsset::Erc20, SwapEvent::Initiated) => Erc20Swap::Initiated::SIGNATURE_HASH,
        (EvmAsset::Erc20, SwapEvent::Added) => Erc20Swap::Added::SIGNATURE_HASH,
        (EvmAsset::Erc20, SwapEvent::Redeemed) => Erc20Swap::Redeemed::SIGNATURE_HASH,
        (EvmAsset::Erc20, SwapEvent::Refunded) => Erc20Swap::Refunded::SIGNATURE_HASH,
    };
    format!("0x{}", hex::encode(hash))
}

/// Indexed bytes32 topic
pub fn hash_topic(secret_hash: &str) -> String {
    format!("0x{}", secret_hash.trim_start_matches("0x").to_lowercase())
}

/// Indexed address topic, left padded to 32 bytes
pub fn address_topic(address: &str) -> String {
    format!(
        "0x{:0>64}",
        address.trim_start_matches("0x").to_lowercase()
    )
}

fn input_bytes(input: &str) -> Option<Vec<u8>> {
    hex::decode(input.trim_start_matches("0x")).ok()
}

/// Locked amount: gwei for ether, raw token units for ERC20
pub fn amount(tx: &EvmPayload) -> Decimal {
    match tx.asset {
        EvmAsset::Ether => to_decimal(tx.value, GWEI_SCALE),
        EvmAsset::Erc20 => erc20_value(&tx.input)
            .map(|value| to_decimal(value, 0))
            .unwrap_or(Decimal::ZERO),
    }
}

fn erc20_value(input: &str) -> Option<U256> {
    let data = input_bytes(input)?;
    if let Ok(call) = Erc20Swap::initiateCall::abi_decode(&data, true) {
        return Some(call.value);
    }
    Erc20Swap::addCall::abi_decode(&data, true)
        .ok()
        .map(|call| call.value)
}

fn to_decimal(value: U256, scale: u32) -> Decimal {
    i128::try_from(value)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, scale).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::ZERO)
}

/// Secret passed to `redeem`, same layout for both contracts
pub fn redeem_secret(tx: &EvmPayload) -> Option<Vec<u8>> {
    let data = input_bytes(&tx.input)?;
    EthSwap::redeemCall::abi_decode(&data, true)
        .ok()
        .map(|call| call.secret.to_vec())
}

/// Terms encoded in an `initiate` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateTerms {
    pub participant: Address,
    pub refund_timestamp: U256,
}

pub fn initiate_terms(tx: &EvmPayload) -> Option<InitiateTerms> {
    let data = input_bytes(&tx.input)?;
    match tx.asset {
        EvmAsset::Ether => EthSwap::initiateCall::abi_decode(&data, true)
            .ok()
            .map(|call| InitiateTerms {
                participant: call.participant,
                refund_timestamp: call.refund_timestamp,
            }),
        EvmAsset::Erc20 => Erc20Swap::initiateCall::abi_decode(&data, true)
            .ok()
            .map(|call| InitiateTerms {
                participant: call.participant,
                refund_timestamp: call.refund_timestamp,
            }),
    }
}

/// Initiate call refunds no earlier than the required timestamp
pub fn is_lock_timely(tx: &EvmPayload, required_refund_timestamp: i64) -> bool {
    let required = U256::from(u64::try_from(required_refund_timestamp).unwrap_or(0));
    initiate_terms(tx)
        .map(|terms| terms.refund_timestamp >= required)
        .unwrap_or(false)
}
