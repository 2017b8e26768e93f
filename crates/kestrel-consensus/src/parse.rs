use crate::block::{parse_block_header, Block, BLOCK_HEADER_BYTES};
use crate::error::{ConsensusError, ErrorCode};
use crate::tx::{OutPoint, Tx, TxInput, TxOutput};
use crate::wire::Cursor;

// Smallest possible serialized sizes, used to bound Vec pre-allocation
// against hostile counts before the bytes are actually read.
const MIN_TX_BYTES: usize = 60;
const MIN_INPUT_BYTES: usize = 41;
const MIN_OUTPUT_BYTES: usize = 9;

fn checked_capacity(count: u64, remaining: usize, min_len: usize) -> Result<usize, ConsensusError> {
    let count: usize = count
        .try_into()
        .map_err(|_| ConsensusError::new(ErrorCode::Oversize, "count overflows usize"))?;
    if count > remaining / min_len + 1 {
        return Err(ConsensusError::new(
            ErrorCode::Oversize,
            "count exceeds remaining bytes",
        ));
    }
    Ok(count)
}

fn parse_tx_from_cursor(cursor: &mut Cursor<'_>) -> Result<Tx, ConsensusError> {
    let version = cursor.read_u32le()?;

    let input_count = checked_capacity(cursor.read_var_int()?, cursor.remaining(), MIN_INPUT_BYTES)?;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let tx_hash = cursor.read_hash()?;
        let index = cursor.read_u32le()?;
        let script_len = checked_capacity(cursor.read_var_int()?, cursor.remaining(), 1)?;
        let script = cursor.read_exact(script_len)?.to_vec();
        let sequence = cursor.read_u32le()?;
        inputs.push(TxInput {
            prev_out: OutPoint { tx_hash, index },
            script,
            sequence,
        });
    }

    let output_count =
        checked_capacity(cursor.read_var_int()?, cursor.remaining(), MIN_OUTPUT_BYTES)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = cursor.read_u64le()?;
        let script_len = checked_capacity(cursor.read_var_int()?, cursor.remaining(), 1)?;
        let script = cursor.read_exact(script_len)?.to_vec();
        outputs.push(TxOutput { value, script });
    }

    let lock_time = cursor.read_u32le()?;

    Ok(Tx {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

pub fn parse_tx_bytes(bytes: &[u8]) -> Result<Tx, ConsensusError> {
    let mut cursor = Cursor::new(bytes);
    let tx = parse_tx_from_cursor(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return Err(ConsensusError::new(ErrorCode::Parse, "trailing bytes"));
    }
    Ok(tx)
}

/// Parse one output starting at the beginning of `bytes`, returning the
/// output and the bytes consumed. Trailing bytes are allowed; this is the
/// entry point for reading a single output out of a stored block.
pub fn parse_tx_output_prefix(bytes: &[u8]) -> Result<(TxOutput, usize), ConsensusError> {
    let mut cursor = Cursor::new(bytes);
    let value = cursor.read_u64le()?;
    let script_len = checked_capacity(cursor.read_var_int()?, cursor.remaining(), 1)?;
    let script = cursor.read_exact(script_len)?.to_vec();
    Ok((TxOutput { value, script }, cursor.pos))
}

/// Parse a block from the start of `bytes`, returning the block and the
/// bytes consumed. The block codec is self-delimiting, so callers reading a
/// concatenated stream (the orphan region of the validation file) use the
/// consumed length to advance.
pub fn parse_block_prefix(bytes: &[u8]) -> Result<(Block, usize), ConsensusError> {
    let mut cursor = Cursor::new(bytes);
    let header = parse_block_header(cursor.read_exact(BLOCK_HEADER_BYTES)?)?;
    let tx_count = checked_capacity(cursor.read_var_int()?, cursor.remaining(), MIN_TX_BYTES)?;
    let mut transactions = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        transactions.push(parse_tx_from_cursor(&mut cursor)?);
    }
    Ok((
        Block {
            header,
            transactions,
        },
        cursor.pos,
    ))
}

pub fn parse_block_bytes(bytes: &[u8]) -> Result<Block, ConsensusError> {
    let (block, consumed) = parse_block_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(ConsensusError::new(ErrorCode::Parse, "trailing bytes"));
    }
    Ok(block)
}
