//! Per-branch block reference array and sorted hash lookup table.

use std::cmp::Ordering;

use crate::search::{interpolation_search, mini_key};
use crate::store::FileRef;

/// A block recorded on a branch: where its bytes live, plus the header
/// fields the validator consults without reloading the block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRef {
    pub file: FileRef,
    pub target: u32,
    pub time: u32,
    pub hash: [u8; 32],
}

/// Lookup entry mapping a block hash to its reference-array position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashIndexEntry {
    pub block_hash: [u8; 32],
    pub ref_index: u32,
}

/// References in insertion (height) order alongside a hash-sorted lookup
/// table. The two stay the same length at all times.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchIndex {
    pub refs: Vec<BlockRef>,
    pub lookup: Vec<HashIndexEntry>,
}

impl BranchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn tip(&self) -> Option<&BlockRef> {
        self.refs.last()
    }

    /// Position of `hash` in the lookup table, or its insertion point.
    pub fn find(&self, hash: &[u8; 32]) -> (usize, bool) {
        interpolation_search(
            &self.lookup,
            mini_key(hash),
            |e| mini_key(&e.block_hash),
            |e| cmp_hash(&e.block_hash, hash),
        )
    }

    /// Reference-array index of the block with `hash`, if known.
    pub fn ref_index_of(&self, hash: &[u8; 32]) -> Option<u32> {
        let (pos, found) = self.find(hash);
        found.then(|| self.lookup[pos].ref_index)
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.find(hash).1
    }

    /// Record a new block: the reference goes at the tail (references are
    /// height-ordered), the lookup entry at its sorted position.
    pub fn push(&mut self, block_ref: BlockRef) {
        let (pos, found) = self.find(&block_ref.hash);
        debug_assert!(!found, "duplicate block hash inserted");
        let entry = HashIndexEntry {
            block_hash: block_ref.hash,
            ref_index: self.refs.len() as u32,
        };
        self.lookup.insert(pos, entry);
        self.refs.push(block_ref);
    }

    /// For each reference index, the position of its entry in the lookup
    /// table. Used when writing the branch file.
    pub fn lookup_positions(&self) -> Vec<u32> {
        let mut positions = vec![0u32; self.lookup.len()];
        for (pos, entry) in self.lookup.iter().enumerate() {
            if let Some(slot) = positions.get_mut(entry.ref_index as usize) {
                *slot = pos as u32;
            }
        }
        positions
    }
}

pub(crate) fn cmp_hash(a: &[u8; 32], b: &[u8; 32]) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_ref(seed: u8) -> BlockRef {
        let mut hash = [0u8; 32];
        hash[0] = seed;
        hash[31] = seed.wrapping_mul(37);
        BlockRef {
            file: FileRef {
                file_id: 0,
                file_pos: seed as u64 * 100,
            },
            target: 0x1d00ffff,
            time: 1_231_006_505 + seed as u32,
            hash,
        }
    }

    #[test]
    fn push_keeps_lookup_sorted_and_aligned() {
        let mut index = BranchIndex::new();
        for seed in [9u8, 3, 200, 57, 120, 1] {
            index.push(block_ref(seed));
        }
        assert_eq!(index.refs.len(), index.lookup.len());
        for pair in index.lookup.windows(2) {
            assert!(pair[0].block_hash < pair[1].block_hash);
        }
        for (i, r) in index.refs.iter().enumerate() {
            assert_eq!(index.ref_index_of(&r.hash), Some(i as u32));
        }
        let positions = index.lookup_positions();
        for (ref_index, pos) in positions.iter().enumerate() {
            assert_eq!(
                index.lookup[*pos as usize].ref_index as usize,
                ref_index
            );
        }
    }

    #[test]
    fn missing_hash_is_not_found() {
        let mut index = BranchIndex::new();
        index.push(block_ref(4));
        assert!(!index.contains(&[0x55u8; 32]));
        assert_eq!(index.ref_index_of(&[0x55u8; 32]), None);
    }
}
