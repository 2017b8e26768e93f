use crate::block::{block_header_bytes, Block};
use crate::tx::{Tx, TxOutput};
use crate::wire::var_int_encode;

pub fn tx_output_bytes(output: &TxOutput) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + output.script.len());
    out.extend_from_slice(&output.value.to_le_bytes());
    out.extend_from_slice(&var_int_encode(output.script.len() as u64));
    out.extend_from_slice(&output.script);
    out
}

pub fn tx_bytes(tx: &Tx) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());
    out.extend_from_slice(&var_int_encode(tx.inputs.len() as u64));
    for input in &tx.inputs {
        out.extend_from_slice(&input.prev_out.tx_hash);
        out.extend_from_slice(&input.prev_out.index.to_le_bytes());
        out.extend_from_slice(&var_int_encode(input.script.len() as u64));
        out.extend_from_slice(&input.script);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }
    out.extend_from_slice(&var_int_encode(tx.outputs.len() as u64));
    for output in &tx.outputs {
        out.extend_from_slice(&tx_output_bytes(output));
    }
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

pub fn block_bytes(block: &Block) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&block_header_bytes(&block.header));
    out.extend_from_slice(&var_int_encode(block.transactions.len() as u64));
    for tx in &block.transactions {
        out.extend_from_slice(&tx_bytes(tx));
    }
    out
}
