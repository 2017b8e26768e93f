//! Per-branch unspent-output index and the serialized-block offset walk
//! that lets it reference outputs without reloading transactions.

use std::cmp::Ordering;

use kestrel_consensus::{var_int_decode, ConsensusError, ErrorCode, BLOCK_HEADER_BYTES};

use crate::search::{interpolation_search, mini_key};
use crate::store::FileRef;

/// One unspent output: its locator in block storage plus the facts the
/// validator needs without reading the block (height and coinbase flag).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRef {
    pub tx_hash: [u8; 32],
    pub output_index: u32,
    pub file: FileRef,
    pub height: u32,
    pub coinbase: bool,
    pub branch: u8,
}

/// Sorted by `(tx_hash, output_index)` with the same search discipline as
/// the block lookup table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnspentOutputIndex {
    entries: Vec<OutputRef>,
}

impl UnspentOutputIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OutputRef] {
        &self.entries
    }

    pub fn find(&self, tx_hash: &[u8; 32], output_index: u32) -> (usize, bool) {
        interpolation_search(
            &self.entries,
            mini_key(tx_hash),
            |e| mini_key(&e.tx_hash),
            |e| match e.tx_hash.cmp(tx_hash) {
                Ordering::Equal => e.output_index.cmp(&output_index),
                other => other,
            },
        )
    }

    pub fn get(&self, tx_hash: &[u8; 32], output_index: u32) -> Option<&OutputRef> {
        let (pos, found) = self.find(tx_hash, output_index);
        found.then(|| &self.entries[pos])
    }

    pub fn insert(&mut self, entry: OutputRef) {
        let (pos, found) = self.find(&entry.tx_hash, entry.output_index);
        if found {
            self.entries[pos] = entry;
        } else {
            self.entries.insert(pos, entry);
        }
    }

    pub fn remove(&mut self, tx_hash: &[u8; 32], output_index: u32) -> Option<OutputRef> {
        let (pos, found) = self.find(tx_hash, output_index);
        found.then(|| self.entries.remove(pos))
    }

    pub fn from_entries(mut entries: Vec<OutputRef>) -> Self {
        entries.sort_by(|a, b| match a.tx_hash.cmp(&b.tx_hash) {
            Ordering::Equal => a.output_index.cmp(&b.output_index),
            other => other,
        });
        Self { entries }
    }
}

/// Walk a serialized block and return, per transaction, the byte offset of
/// each of its outputs inside the block. The walk skips structure by the
/// var-length size prefixes alone; it never deserializes scripts, which is
/// what lets the unspent index point straight at output bytes on disk.
pub fn output_offsets(block: &[u8]) -> Result<Vec<Vec<usize>>, ConsensusError> {
    let mut pos = 0usize;

    fn advance(block: &[u8], pos: &mut usize, len: usize) -> Result<(), ConsensusError> {
        let end = pos
            .checked_add(len)
            .ok_or_else(|| ConsensusError::new(ErrorCode::Parse, "offset overflow"))?;
        if end > block.len() {
            return Err(ConsensusError::new(ErrorCode::Parse, "walk past block end"));
        }
        *pos = end;
        Ok(())
    }

    fn take_var_int(block: &[u8], pos: &mut usize) -> Result<u64, ConsensusError> {
        let (value, used) = var_int_decode(&block[*pos..])?;
        *pos += used;
        Ok(value)
    }

    advance(block, &mut pos, BLOCK_HEADER_BYTES)?;
    let tx_count = take_var_int(block, &mut pos)?;
    let mut offsets = Vec::with_capacity(tx_count.min(1024) as usize);
    for _ in 0..tx_count {
        // version
        advance(block, &mut pos, 4)?;
        let input_count = take_var_int(block, &mut pos)?;
        for _ in 0..input_count {
            // previous output hash and index
            advance(block, &mut pos, 36)?;
            let script_len = take_var_int(block, &mut pos)?;
            advance(block, &mut pos, script_len as usize)?;
            // sequence
            advance(block, &mut pos, 4)?;
        }
        let output_count = take_var_int(block, &mut pos)?;
        let mut tx_offsets = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            tx_offsets.push(pos);
            // value
            advance(block, &mut pos, 8)?;
            let script_len = take_var_int(block, &mut pos)?;
            advance(block, &mut pos, script_len as usize)?;
        }
        // lock time
        advance(block, &mut pos, 4)?;
        offsets.push(tx_offsets);
    }
    Ok(offsets)
}
