//! Swap script templates for bitcoin-based chains
//!
//! Two redeem script shapes are recognized:
//!
//! * HTLC, the one this service generates:
//!   `OP_IF <lock_time> OP_CLTV OP_DROP OP_DUP OP_HASH160 <refund_pkh> OP_EQUALVERIFY OP_CHECKSIG
//!    OP_ELSE OP_SIZE <size> OP_EQUALVERIFY OP_HASH256 <secret_hash> OP_EQUALVERIFY
//!    OP_DUP OP_HASH160 <receiver_pkh> OP_EQUALVERIFY OP_CHECKSIG
//!    OP_ENDIF`
//! * Legacy multisig swap, still found in old bare outputs:
//!   `OP_IF 2 <pk> <pk> 2 OP_CHECKMULTISIG OP_ELSE <hash op> <secret_hash> OP_EQUALVERIFY
//!    OP_DUP OP_HASH160 <receiver_pkh> OP_EQUALVERIFY OP_CHECKSIG OP_ENDIF`
//!
//! Both keep the secret path in the `OP_ELSE` branch. Spends select the branch
//! with the last stack push before the redeem script, a literal false takes the
//! secret path.

use crate::chain::transaction::{secret_matches, UtxoPayload};
use crate::chain::HtlcQuery;
use crate::currency::UtxoNetwork;

use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, Script, ScriptBuf};
use bitcoin::ScriptHash;

const HTLC_OPS: usize = 22;
const LEGACY_OPS: usize = 16;

/// Normalized script instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    Op(Opcode),
    Push(Vec<u8>),
}

impl ScriptOp {
    /// `OP_0` / `OP_FALSE` decodes as an empty push
    pub fn is_false(&self) -> bool {
        matches!(self, ScriptOp::Push(data) if data.is_empty())
    }

    pub fn is_op(&self, op: Opcode) -> bool {
        matches!(self, ScriptOp::Op(o) if *o == op)
    }

    pub fn push_data(&self) -> Option<&[u8]> {
        match self {
            ScriptOp::Push(data) => Some(data),
            ScriptOp::Op(_) => None,
        }
    }

    pub fn number(&self) -> Option<i64> {
        match self {
            ScriptOp::Push(data) => decode_script_num(data),
            ScriptOp::Op(op) => {
                let code = op.to_u8();
                let one = OP_PUSHNUM_1.to_u8();
                let sixteen = OP_PUSHNUM_16.to_u8();
                if (one..=sixteen).contains(&code) {
                    Some((code - one + 1) as i64)
                } else if *op == OP_PUSHNUM_NEG1 {
                    Some(-1)
                } else {
                    None
                }
            }
        }
    }

    fn push_array<const N: usize>(&self) -> Option<[u8; N]> {
        self.push_data().and_then(|d| <[u8; N]>::try_from(d).ok())
    }
}

fn decode_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }

    let mut magnitude = bytes.to_vec();
    let negative = magnitude.last().is_some_and(|b| (b & 0x80) != 0);
    if let Some(last) = magnitude.last_mut() {
        *last &= 0x7f;
    }

    let mut value: i64 = 0;
    for (i, b) in magnitude.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }

    Some(if negative { -value } else { value })
}

/// Parse a script into instructions, `None` on malformed pushes
pub fn parse_ops(script: &Script) -> Option<Vec<ScriptOp>> {
    script
        .instructions()
        .map(|ins| {
            ins.ok().map(|ins| match ins {
                Instruction::Op(op) => ScriptOp::Op(op),
                Instruction::PushBytes(bytes) => ScriptOp::Push(bytes.as_bytes().to_vec()),
            })
        })
        .collect()
}

pub fn script_from_hex(hex_script: &str) -> Option<ScriptBuf> {
    hex::decode(hex_script).ok().map(ScriptBuf::from_bytes)
}

/// P2SH output script paying to the redeem script
pub fn p2sh(redeem_script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2sh(&ScriptHash::hash(redeem_script.as_bytes()))
}

/// Pubkey hash of a base58 P2PKH address on the given network
pub fn pubkey_hash(address: &str, network: UtxoNetwork) -> Option<[u8; 20]> {
    let payload = bitcoin::base58::decode_check(address).ok()?;
    match payload.split_first() {
        Some((version, hash)) if *version == network.p2pkh_prefix => <[u8; 20]>::try_from(hash).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcScript {
    pub secret_hash: [u8; 32],
    pub secret_size: i64,
    pub receiver_pkh: [u8; 20],
    pub refund_pkh: [u8; 20],
    pub lock_time: i64,
}

impl HtlcScript {
    /// Template for the swap terms, `None` when an address or hash is not decodable
    pub fn from_terms(query: &HtlcQuery, network: UtxoNetwork) -> Option<Self> {
        let secret_hash = hex::decode(query.secret_hash.trim_start_matches("0x")).ok()?;
        Some(Self {
            secret_hash: <[u8; 32]>::try_from(secret_hash.as_slice()).ok()?,
            secret_size: i64::try_from(query.secret_size).ok()?,
            receiver_pkh: pubkey_hash(query.address.as_deref()?, network)?,
            refund_pkh: pubkey_hash(query.refund_address.as_deref()?, network)?,
            lock_time: query.refund_timestamp(),
        })
    }

    pub fn build(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_IF)
            .push_int(self.lock_time)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.refund_pkh)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_SIZE)
            .push_int(self.secret_size)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_HASH256)
            .push_slice(self.secret_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.receiver_pkh)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script()
    }

    pub fn parse(script: &Script) -> Option<Self> {
        Self::from_ops(&parse_ops(script)?)
    }

    fn from_ops(ops: &[ScriptOp]) -> Option<Self> {
        if ops.len() != HTLC_OPS {
            return None;
        }

        let shape = [
            (0, OP_IF),
            (2, OP_CLTV),
            (3, OP_DROP),
            (4, OP_DUP),
            (5, OP_HASH160),
            (7, OP_EQUALVERIFY),
            (8, OP_CHECKSIG),
            (9, OP_ELSE),
            (10, OP_SIZE),
            (12, OP_EQUALVERIFY),
            (13, OP_HASH256),
            (15, OP_EQUALVERIFY),
            (16, OP_DUP),
            (17, OP_HASH160),
            (19, OP_EQUALVERIFY),
            (20, OP_CHECKSIG),
            (21, OP_ENDIF),
        ];
        if !shape.iter().all(|(i, op)| ops[*i].is_op(*op)) {
            return None;
        }

        Some(Self {
            lock_time: ops[1].number()?,
            refund_pkh: ops[6].push_array()?,
            secret_size: ops[11].number()?,
            secret_hash: ops[14].push_array()?,
            receiver_pkh: ops[18].push_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySwapScript {
    pub secret_hash: Vec<u8>,
    pub receiver_pkh: [u8; 20],
}

impl LegacySwapScript {
    pub fn parse(script: &Script) -> Option<Self> {
        Self::from_ops(&parse_ops(script)?)
    }

    fn from_ops(ops: &[ScriptOp]) -> Option<Self> {
        if ops.len() != LEGACY_OPS {
            return None;
        }

        let hash_op = [OP_HASH160, OP_HASH256, OP_SHA256]
            .iter()
            .any(|op| ops[7].is_op(*op));

        let shaped = ops[0].is_op(OP_IF)
            && ops[1].number() == Some(2)
            && ops[4].number() == Some(2)
            && ops[5].is_op(OP_CHECKMULTISIG)
            && ops[6].is_op(OP_ELSE)
            && hash_op
            && ops[9].is_op(OP_EQUALVERIFY)
            && ops[10].is_op(OP_DUP)
            && ops[11].is_op(OP_HASH160)
            && ops[13].is_op(OP_EQUALVERIFY)
            && ops[14].is_op(OP_CHECKSIG)
            && ops[15].is_op(OP_ENDIF);

        if !shaped {
            return None;
        }

        Some(Self {
            secret_hash: ops[8].push_data()?.to_vec(),
            receiver_pkh: ops[12].push_array()?,
        })
    }
}

/// A recognized swap redeem script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapTemplate {
    Htlc(HtlcScript),
    Legacy(LegacySwapScript),
}

impl SwapTemplate {
    pub fn parse(script: &Script) -> Option<Self> {
        let ops = parse_ops(script)?;
        HtlcScript::from_ops(&ops)
            .map(SwapTemplate::Htlc)
            .or_else(|| LegacySwapScript::from_ops(&ops).map(SwapTemplate::Legacy))
    }
}

/// Output pays to the swap described by the query
///
/// Matched in order: a bare legacy script with the same secret hash, the P2SH
/// of the generated HTLC, and the P2SH of a raw script passed base64 encoded in
/// place of the refund address (compatibility only).
pub fn is_swap_payment(script_pub_key: &Script, query: &HtlcQuery, network: UtxoNetwork) -> bool {
    if let Some(legacy) = LegacySwapScript::parse(script_pub_key) {
        return hex::encode(&legacy.secret_hash)
            .eq_ignore_ascii_case(query.secret_hash.trim_start_matches("0x"));
    }

    if let Some(htlc) = HtlcScript::from_terms(query, network) {
        if p2sh(&htlc.build()).as_bytes() == script_pub_key.as_bytes() {
            return true;
        }
    }

    query
        .refund_address
        .as_deref()
        .and_then(|refund| STANDARD.decode(refund).ok())
        .map(|raw| p2sh(&ScriptBuf::from_bytes(raw)).as_bytes() == script_pub_key.as_bytes())
        .unwrap_or(false)
}

pub fn is_swap_payment_hex(script_pub_key: &str, query: &HtlcQuery, network: UtxoNetwork) -> bool {
    script_from_hex(script_pub_key)
        .map(|script| is_swap_payment(&script, query, network))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendKind {
    Redeem,
    Refund,
}

/// Classify the signature script spending a swap output
pub fn classify_spend(script_sig: &Script, locked: &Script) -> Option<SpendKind> {
    let ops = parse_ops(script_sig)?;

    if LegacySwapScript::parse(locked).is_some() {
        // bare output, selector is the last push
        return classify(ops.last()?, ops.len(), 4, 3);
    }

    if !locked.is_p2sh() || ops.len() < 2 {
        return None;
    }

    let redeem_script = ScriptBuf::from_bytes(ops.last()?.push_data()?.to_vec());
    if p2sh(&redeem_script).as_bytes() != locked.as_bytes() {
        return None;
    }

    SwapTemplate::parse(&redeem_script)?;
    classify(&ops[ops.len() - 2], ops.len(), 5, 4)
}

fn classify(selector: &ScriptOp, len: usize, min_redeem_ops: usize, min_refund_ops: usize) -> Option<SpendKind> {
    if selector.is_false() {
        (len >= min_redeem_ops).then_some(SpendKind::Redeem)
    } else {
        (len >= min_refund_ops).then_some(SpendKind::Refund)
    }
}

pub fn classify_spend_hex(script_sig: &str, locked: &str) -> Option<SpendKind> {
    classify_spend(&script_from_hex(script_sig)?, &script_from_hex(locked)?)
}

/// Push data of the expected size whose double hash is the secret hash
pub fn extract_secret(tx: &UtxoPayload, secret_hash: &str, secret_size: usize) -> Option<Vec<u8>> {
    tx.inputs
        .iter()
        .filter_map(|input| script_from_hex(&input.script_sig))
        .filter_map(|script| parse_ops(&script))
        .flatten()
        .filter_map(|op| match op {
            ScriptOp::Push(data) if data.len() == secret_size => Some(data),
            _ => None,
        })
        .find(|data| secret_matches(data, secret_hash))
}
