//! Full block validation: coinbase structure, signature-operation budget,
//! per-input resolution against the block itself or the branch unspent view,
//! script execution with P2SH handling, and the fee/reward ceiling.

use kestrel_crypto::SignatureVerifier;

use kestrel_consensus::{
    cast_to_bool, execute, is_coinbase, is_final, is_p2sh, is_push_only, sig_op_count,
    validate_basic, var_int_decode, Block, Consensus, OutPoint, ScriptResult, SigContext, Tx,
    TxOutput, MAX_MONEY,
};

use crate::error::ChainError;
use crate::store::BlockStore;
use crate::utxo::{OutputRef, UnspentOutputIndex};

/// Verdict of a full validation. `Bad` is a peer fault with a short reason
/// for the diagnostic sink; environment failures surface as `ChainError`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockValidity {
    Valid,
    Bad(&'static str),
}

macro_rules! bad {
    ($msg:expr) => {
        return Ok(BlockValidity::Bad($msg))
    };
}

/// Read the output an `OutputRef` points at, without loading its block.
/// The reference points at the output's first byte: eight value bytes, the
/// script length var-int, then the script.
pub(crate) fn load_output(
    store: &mut BlockStore,
    out_ref: &OutputRef,
) -> Result<TxOutput, ChainError> {
    let head = store.read_at(out_ref.branch, out_ref.file, 9)?;
    let var_len = match head[8] {
        0..=0xfc => 1usize,
        0xfd => 3,
        0xfe => 5,
        0xff => 9,
    };
    let prefix = if var_len == 1 {
        head
    } else {
        store.read_at(out_ref.branch, out_ref.file, 8 + var_len)?
    };
    let (script_len, _) = var_int_decode(&prefix[8..])
        .map_err(|e| ChainError::corrupt(format!("output length prefix: {e}")))?;
    if script_len > 1_000_000 {
        return Err(ChainError::corrupt("stored output script length absurd"));
    }
    let total = 8 + var_len + script_len as usize;
    let bytes = store.read_at(out_ref.branch, out_ref.file, total)?;
    let (output, consumed) = kestrel_consensus::parse_tx_output_prefix(&bytes)
        .map_err(|e| ChainError::corrupt(format!("stored output: {e}")))?;
    if consumed != total {
        return Err(ChainError::corrupt("stored output length mismatch"));
    }
    Ok(output)
}

/// Resolve one spent output: earlier transactions of this block first, then
/// the branch unspent view.
enum Resolved {
    InBlock(TxOutput),
    Stored(TxOutput, OutputRef),
    Missing,
}

fn resolve_prev_out(
    block: &Block,
    tx_hashes: &[[u8; 32]],
    tx_index: usize,
    prev_out: &OutPoint,
    utxo: &UnspentOutputIndex,
    store: &mut BlockStore,
) -> Result<Resolved, ChainError> {
    for earlier in 0..tx_index {
        if tx_hashes[earlier] == prev_out.tx_hash {
            let outputs = &block.transactions[earlier].outputs;
            let Some(output) = outputs.get(prev_out.index as usize) else {
                return Ok(Resolved::Missing);
            };
            return Ok(Resolved::InBlock(output.clone()));
        }
    }
    match utxo.get(&prev_out.tx_hash, prev_out.index) {
        Some(out_ref) => {
            let out_ref = out_ref.clone();
            let output = load_output(store, &out_ref)?;
            Ok(Resolved::Stored(output, out_ref))
        }
        None => Ok(Resolved::Missing),
    }
}

fn run_input_scripts(
    tx: &Tx,
    input_index: usize,
    prev_script: &[u8],
    sig_ops: &mut u32,
    consensus: &dyn Consensus,
    verifier: &dyn SignatureVerifier,
) -> Result<BlockValidity, ChainError> {
    let ctx = SigContext {
        verifier,
        tx,
        input_index,
    };
    let input_script = &tx.inputs[input_index].script;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    match execute(input_script, &mut stack, &ctx) {
        ScriptResult::Ok => {}
        ScriptResult::Invalid => bad!("input script invalid"),
        ScriptResult::Error(e) => return Err(ChainError::Verifier(e)),
    }
    if is_p2sh(prev_script) {
        // The spent output is a script hash: the input script must be pure
        // pushes and the serialized redeem script joins the sigop budget at
        // the accurate rate.
        if !is_push_only(input_script) {
            bad!("p2sh input script not push-only");
        }
        let Some(redeem) = stack.last() else {
            bad!("p2sh input leaves an empty stack");
        };
        *sig_ops = sig_ops.saturating_add(sig_op_count(redeem, true));
        if *sig_ops > consensus.max_sig_ops() {
            bad!("signature operation budget exceeded");
        }
    }
    match execute(prev_script, &mut stack, &ctx) {
        ScriptResult::Ok => {}
        ScriptResult::Invalid => bad!("output script invalid"),
        ScriptResult::Error(e) => return Err(ChainError::Verifier(e)),
    }
    match stack.last() {
        Some(top) if cast_to_bool(top) => Ok(BlockValidity::Valid),
        _ => Ok(BlockValidity::Bad("script evaluates to false")),
    }
}

/// Validate every transaction of a block at `height` against the branch
/// unspent view. Does not mutate anything: applying the block's effects is
/// the caller's commit step.
pub(crate) fn full_block_validation(
    block: &Block,
    tx_hashes: &[[u8; 32]],
    height: u32,
    utxo: &UnspentOutputIndex,
    store: &mut BlockStore,
    consensus: &dyn Consensus,
    verifier: &dyn SignatureVerifier,
) -> Result<BlockValidity, ChainError> {
    if block.transactions.is_empty() || !is_coinbase(&block.transactions[0]) {
        bad!("first transaction is not coinbase");
    }

    let mut block_reward = consensus.block_reward(height);
    let mut sig_ops = 0u32;
    let mut coinbase_output_value = 0u64;
    let mut spent_in_block: std::collections::HashSet<OutPoint> = std::collections::HashSet::new();

    for (tx_index, tx) in block.transactions.iter().enumerate() {
        let coinbase = tx_index == 0;
        if !coinbase && is_coinbase(tx) {
            bad!("second coinbase");
        }
        if !is_final(tx, block.header.time, height) {
            bad!("transaction is not final");
        }
        let summary = match validate_basic(tx, coinbase) {
            Ok(s) => s,
            Err(e) => bad!(e.msg),
        };
        if coinbase {
            coinbase_output_value = summary.output_value;
        }

        for input in &tx.inputs {
            sig_ops = sig_ops.saturating_add(sig_op_count(&input.script, false));
        }
        for output in &tx.outputs {
            sig_ops = sig_ops.saturating_add(sig_op_count(&output.script, false));
        }
        if sig_ops > consensus.max_sig_ops() {
            bad!("signature operation budget exceeded");
        }

        if coinbase {
            continue;
        }

        let mut input_value = 0u64;
        for (input_index, prev_out) in summary.spent.iter().enumerate() {
            // No earlier input in this block may spend the same output.
            if !spent_in_block.insert(*prev_out) {
                bad!("previous output spent twice in block");
            }
            let prev_output = match resolve_prev_out(
                block, tx_hashes, tx_index, prev_out, utxo, store,
            )? {
                Resolved::InBlock(output) => output,
                Resolved::Stored(output, out_ref) => {
                    if out_ref.coinbase
                        && out_ref.height + consensus.coinbase_maturity() > height
                    {
                        bad!("immature coinbase spend");
                    }
                    output
                }
                Resolved::Missing => bad!("previous output not found unspent"),
            };
            match run_input_scripts(
                tx,
                input_index,
                &prev_output.script,
                &mut sig_ops,
                consensus,
                verifier,
            )? {
                BlockValidity::Valid => {}
                bad => return Ok(bad),
            }
            input_value = match input_value.checked_add(prev_output.value) {
                Some(v) if v <= MAX_MONEY => v,
                _ => bad!("input value above money range"),
            };
        }

        if input_value < summary.output_value {
            bad!("outputs exceed inputs");
        }
        let fee = input_value - summary.output_value;
        block_reward = match block_reward.checked_add(fee) {
            Some(v) => v,
            None => bad!("fee overflow"),
        };
    }

    if coinbase_output_value > block_reward {
        bad!("coinbase claims more than reward plus fees");
    }

    Ok(BlockValidity::Valid)
}
