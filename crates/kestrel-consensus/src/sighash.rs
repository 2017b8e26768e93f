use kestrel_crypto::sha256d;

use crate::error::{ConsensusError, ErrorCode};
use crate::tx::Tx;
use crate::wire::var_int_encode;

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Legacy signature hash: the transaction re-serialized with input scripts
/// replaced by `script_code` for the signed input and blanked elsewhere,
/// outputs filtered per the hash-type, then double SHA-256 with the
/// hash-type appended as a 32-bit word.
pub fn signature_hash(
    tx: &Tx,
    input_index: usize,
    script_code: &[u8],
    hash_type: u8,
) -> Result<[u8; 32], ConsensusError> {
    if input_index >= tx.inputs.len() {
        return Err(ConsensusError::new(ErrorCode::Parse, "sighash: input index"));
    }
    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;
    let base = hash_type & 0x1f;

    if base == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        // Historical quirk: signing a missing output hashes the value one.
        let mut one = [0u8; 32];
        one[0] = 1;
        return Ok(one);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&tx.version.to_le_bytes());

    if anyone_can_pay {
        buf.extend_from_slice(&var_int_encode(1));
        let input = &tx.inputs[input_index];
        buf.extend_from_slice(&input.prev_out.tx_hash);
        buf.extend_from_slice(&input.prev_out.index.to_le_bytes());
        buf.extend_from_slice(&var_int_encode(script_code.len() as u64));
        buf.extend_from_slice(script_code);
        buf.extend_from_slice(&input.sequence.to_le_bytes());
    } else {
        buf.extend_from_slice(&var_int_encode(tx.inputs.len() as u64));
        for (i, input) in tx.inputs.iter().enumerate() {
            buf.extend_from_slice(&input.prev_out.tx_hash);
            buf.extend_from_slice(&input.prev_out.index.to_le_bytes());
            if i == input_index {
                buf.extend_from_slice(&var_int_encode(script_code.len() as u64));
                buf.extend_from_slice(script_code);
            } else {
                buf.extend_from_slice(&var_int_encode(0));
            }
            let sequence = if i != input_index && (base == SIGHASH_NONE || base == SIGHASH_SINGLE)
            {
                0
            } else {
                input.sequence
            };
            buf.extend_from_slice(&sequence.to_le_bytes());
        }
    }

    match base {
        SIGHASH_NONE => buf.extend_from_slice(&var_int_encode(0)),
        SIGHASH_SINGLE => {
            buf.extend_from_slice(&var_int_encode(input_index as u64 + 1));
            for (i, output) in tx.outputs.iter().enumerate().take(input_index + 1) {
                if i == input_index {
                    buf.extend_from_slice(&output.value.to_le_bytes());
                    buf.extend_from_slice(&var_int_encode(output.script.len() as u64));
                    buf.extend_from_slice(&output.script);
                } else {
                    buf.extend_from_slice(&u64::MAX.to_le_bytes());
                    buf.extend_from_slice(&var_int_encode(0));
                }
            }
        }
        _ => {
            buf.extend_from_slice(&var_int_encode(tx.outputs.len() as u64));
            for output in &tx.outputs {
                buf.extend_from_slice(&output.value.to_le_bytes());
                buf.extend_from_slice(&var_int_encode(output.script.len() as u64));
                buf.extend_from_slice(&output.script);
            }
        }
    }

    buf.extend_from_slice(&tx.lock_time.to_le_bytes());
    buf.extend_from_slice(&(hash_type as u32).to_le_bytes());
    Ok(sha256d(&buf))
}
