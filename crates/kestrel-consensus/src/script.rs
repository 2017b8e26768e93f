//! Legacy script templates, signature-operation counting, and a stack
//! interpreter covering the pay-to-pubkey, pay-to-pubkey-hash and
//! pay-to-script-hash spend shapes. Opcodes outside that surface make a
//! script invalid rather than faulting the node.

use kestrel_crypto::{hash160, sha256, sha256d, SignatureVerifier};

use crate::sighash::signature_hash;
use crate::tx::Tx;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

const MAX_SCRIPT_BYTES: usize = 10_000;
const MAX_ELEMENT_BYTES: usize = 520;
const MAX_STACK_DEPTH: usize = 1_000;
const MAX_MULTISIG_KEYS: i64 = 20;

/// Outcome of executing one script. `Invalid` is a peer fault; `Error` means
/// the verifier backend failed and the block must not be judged on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptResult {
    Ok,
    Invalid,
    Error(String),
}

/// Transaction context a signature check needs.
pub struct SigContext<'a> {
    pub verifier: &'a dyn SignatureVerifier,
    pub tx: &'a Tx,
    pub input_index: usize,
}

/// One decoded operation: the opcode byte and its push payload, if any.
struct Op<'a> {
    opcode: u8,
    push: Option<&'a [u8]>,
}

/// Decode the operation at `pc`. Returns the op and the next pc, or None on
/// a malformed push.
fn decode_op(script: &[u8], pc: usize) -> Option<(Op<'_>, usize)> {
    let opcode = *script.get(pc)?;
    let mut cursor = pc + 1;
    let push_len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => {
            let n = *script.get(cursor)? as usize;
            cursor += 1;
            n
        }
        OP_PUSHDATA2 => {
            let b = script.get(cursor..cursor + 2)?;
            cursor += 2;
            u16::from_le_bytes([b[0], b[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let b = script.get(cursor..cursor + 4)?;
            cursor += 4;
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
        }
        _ => {
            return Some((Op { opcode, push: None }, cursor));
        }
    };
    let data = script.get(cursor..cursor + push_len)?;
    Some((
        Op {
            opcode,
            push: Some(data),
        },
        cursor + push_len,
    ))
}

/// Stack truthiness: empty and zero are false, and so is negative zero
/// (a lone sign bit in the last byte).
pub fn cast_to_bool(element: &[u8]) -> bool {
    for (i, &b) in element.iter().enumerate() {
        if b != 0 {
            return !(b == 0x80 && i == element.len() - 1);
        }
    }
    false
}

/// Minimal script-number decode, little-endian with a sign bit, capped at
/// four bytes.
fn decode_num(element: &[u8]) -> Option<i64> {
    if element.len() > 4 {
        return None;
    }
    if element.is_empty() {
        return Some(0);
    }
    let mut value: i64 = 0;
    for (i, &b) in element.iter().enumerate() {
        value |= (b as i64) << (8 * i);
    }
    let last = element[element.len() - 1];
    if last & 0x80 != 0 {
        let mask = (0x80i64) << (8 * (element.len() - 1));
        value = -(value & !mask);
    }
    Some(value)
}

fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

fn small_int_push(opcode: u8) -> Vec<u8> {
    match opcode {
        OP_0 => Vec::new(),
        OP_1NEGATE => vec![0x81],
        _ => vec![opcode - OP_1 + 1],
    }
}

fn check_one_sig(
    ctx: &SigContext<'_>,
    script_code: &[u8],
    sig: &[u8],
    pubkey: &[u8],
) -> Result<bool, ScriptResult> {
    if sig.is_empty() {
        return Ok(false);
    }
    let hash_type = sig[sig.len() - 1];
    let digest = match signature_hash(ctx.tx, ctx.input_index, script_code, hash_type) {
        Ok(d) => d,
        Err(_) => return Err(ScriptResult::Invalid),
    };
    ctx.verifier
        .verify_ecdsa(pubkey, &sig[..sig.len() - 1], &digest)
        .map_err(ScriptResult::Error)
}

/// Execute a script against the given stack.
pub fn execute(script: &[u8], stack: &mut Vec<Vec<u8>>, ctx: &SigContext<'_>) -> ScriptResult {
    if script.len() > MAX_SCRIPT_BYTES {
        return ScriptResult::Invalid;
    }
    let mut pc = 0usize;
    while pc < script.len() {
        let Some((op, next_pc)) = decode_op(script, pc) else {
            return ScriptResult::Invalid;
        };
        pc = next_pc;

        if let Some(data) = op.push {
            if data.len() > MAX_ELEMENT_BYTES {
                return ScriptResult::Invalid;
            }
            stack.push(data.to_vec());
        } else {
            match op.opcode {
                OP_0 | OP_1NEGATE | OP_1..=OP_16 => stack.push(small_int_push(op.opcode)),
                OP_NOP | OP_CODESEPARATOR => {}
                OP_VERIFY => {
                    let Some(top) = stack.pop() else {
                        return ScriptResult::Invalid;
                    };
                    if !cast_to_bool(&top) {
                        return ScriptResult::Invalid;
                    }
                }
                OP_RETURN => return ScriptResult::Invalid,
                OP_DROP => {
                    if stack.pop().is_none() {
                        return ScriptResult::Invalid;
                    }
                }
                OP_DUP => {
                    let Some(top) = stack.last() else {
                        return ScriptResult::Invalid;
                    };
                    stack.push(top.clone());
                }
                OP_SWAP => {
                    let len = stack.len();
                    if len < 2 {
                        return ScriptResult::Invalid;
                    }
                    stack.swap(len - 1, len - 2);
                }
                OP_EQUAL | OP_EQUALVERIFY => {
                    let (Some(a), Some(b)) = (stack.pop(), stack.pop()) else {
                        return ScriptResult::Invalid;
                    };
                    let equal = a == b;
                    if op.opcode == OP_EQUALVERIFY {
                        if !equal {
                            return ScriptResult::Invalid;
                        }
                    } else {
                        stack.push(encode_bool(equal));
                    }
                }
                OP_SHA256 => {
                    let Some(top) = stack.pop() else {
                        return ScriptResult::Invalid;
                    };
                    stack.push(sha256(&top).to_vec());
                }
                OP_HASH160 => {
                    let Some(top) = stack.pop() else {
                        return ScriptResult::Invalid;
                    };
                    stack.push(hash160(&top).to_vec());
                }
                OP_HASH256 => {
                    let Some(top) = stack.pop() else {
                        return ScriptResult::Invalid;
                    };
                    stack.push(sha256d(&top).to_vec());
                }
                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let (Some(pubkey), Some(sig)) = (stack.pop(), stack.pop()) else {
                        return ScriptResult::Invalid;
                    };
                    let valid = match check_one_sig(ctx, script, &sig, &pubkey) {
                        Ok(v) => v,
                        Err(r) => return r,
                    };
                    if op.opcode == OP_CHECKSIGVERIFY {
                        if !valid {
                            return ScriptResult::Invalid;
                        }
                    } else {
                        stack.push(encode_bool(valid));
                    }
                }
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let Some(n) = stack.pop().and_then(|e| decode_num(&e)) else {
                        return ScriptResult::Invalid;
                    };
                    if !(0..=MAX_MULTISIG_KEYS).contains(&n) || stack.len() < n as usize {
                        return ScriptResult::Invalid;
                    }
                    let mut keys: Vec<Vec<u8>> = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        keys.push(stack.pop().unwrap_or_default());
                    }
                    keys.reverse();
                    let Some(m) = stack.pop().and_then(|e| decode_num(&e)) else {
                        return ScriptResult::Invalid;
                    };
                    if !(0..=n).contains(&m) || stack.len() < m as usize {
                        return ScriptResult::Invalid;
                    }
                    let mut sigs: Vec<Vec<u8>> = Vec::with_capacity(m as usize);
                    for _ in 0..m {
                        sigs.push(stack.pop().unwrap_or_default());
                    }
                    sigs.reverse();
                    // The historical extra element consumed by CHECKMULTISIG.
                    if stack.pop().is_none() {
                        return ScriptResult::Invalid;
                    }
                    let mut key_iter = keys.iter();
                    let mut all_matched = true;
                    'sigs: for sig in &sigs {
                        for key in key_iter.by_ref() {
                            match check_one_sig(ctx, script, sig, key) {
                                Ok(true) => continue 'sigs,
                                Ok(false) => {}
                                Err(r) => return r,
                            }
                        }
                        all_matched = false;
                        break;
                    }
                    if op.opcode == OP_CHECKMULTISIGVERIFY {
                        if !all_matched {
                            return ScriptResult::Invalid;
                        }
                    } else {
                        stack.push(encode_bool(all_matched));
                    }
                }
                _ => return ScriptResult::Invalid,
            }
        }
        if stack.len() > MAX_STACK_DEPTH {
            return ScriptResult::Invalid;
        }
    }
    ScriptResult::Ok
}

/// Pay-to-script-hash template: `OP_HASH160 <20 bytes> OP_EQUAL`.
pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// True when the script consists only of push operations.
pub fn is_push_only(script: &[u8]) -> bool {
    let mut pc = 0usize;
    while pc < script.len() {
        let Some((op, next_pc)) = decode_op(script, pc) else {
            return false;
        };
        if op.opcode > OP_16 {
            return false;
        }
        pc = next_pc;
    }
    true
}

/// Count signature operations. With `accurate`, a CHECKMULTISIG preceded by
/// a small-integer push counts that many keys; otherwise it costs the full
/// twenty. Counting stops at a malformed push, matching the historical
/// behavior.
pub fn sig_op_count(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut last_opcode = 0xffu8;
    let mut pc = 0usize;
    while pc < script.len() {
        let Some((op, next_pc)) = decode_op(script, pc) else {
            break;
        };
        match op.opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                if accurate && (OP_1..=OP_16).contains(&last_opcode) {
                    count += (last_opcode - OP_1 + 1) as u32;
                } else {
                    count += MAX_MULTISIG_KEYS as u32;
                }
            }
            _ => {}
        }
        last_opcode = op.opcode;
        pc = next_pc;
    }
    count
}
