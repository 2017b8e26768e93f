//! Per-branch chain state.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::genesis::{GENESIS_HASH, GENESIS_TIME};
use crate::index::{BlockRef, BranchIndex};
use crate::store::FileRef;
use crate::utxo::UnspentOutputIndex;

use kestrel_consensus::MAX_TARGET;

/// A linear run of blocks rooted at genesis (branch 0) or at an interior
/// block of an earlier branch. Branch ids only grow, so `parent_branch` is
/// always smaller than the branch's own id and the parent edges form a tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub index: BranchIndex,
    pub unspent: UnspentOutputIndex,
    pub parent_branch: u8,
    pub parent_block_index: u32,
    pub start_height: u32,
    /// Count of fully validated references from the front of `index.refs`.
    pub last_validated_index: u32,
    pub last_retarget_time: u32,
    /// The previous six block timestamps; entry 0 is six back.
    pub prev_times: [u32; 6],
    /// Cumulative work from genesis to this branch's tip, genesis excluded.
    pub work: BigUint,
}

impl Branch {
    /// Branch 0 as materialized on first start: one reference for genesis
    /// at the front of the first block file.
    pub fn genesis() -> Self {
        let mut index = BranchIndex::new();
        index.push(BlockRef {
            file: FileRef {
                file_id: 0,
                file_pos: 0,
            },
            target: MAX_TARGET,
            time: GENESIS_TIME,
            hash: GENESIS_HASH,
        });
        Branch {
            index,
            unspent: UnspentOutputIndex::new(),
            parent_branch: 0,
            parent_block_index: 0,
            start_height: 0,
            last_validated_index: 1,
            last_retarget_time: GENESIS_TIME,
            prev_times: [GENESIS_TIME; 6],
            work: BigUint::zero(),
        }
    }

    /// Height of the block at reference index `idx`.
    pub fn height_of(&self, idx: u32) -> u32 {
        self.start_height + idx
    }

    /// Height a block extending this branch would land on.
    pub fn next_height(&self) -> u32 {
        self.start_height + self.index.len() as u32
    }

    pub fn tip(&self) -> Option<&BlockRef> {
        self.index.tip()
    }

    /// Whether every reference on this branch has been fully validated.
    pub fn fully_validated(&self) -> bool {
        self.last_validated_index as usize == self.index.len()
    }

    /// Record a newly accepted block's timestamp in the six-entry cache.
    pub fn rotate_prev_times(&mut self, time: u32) {
        self.prev_times.rotate_left(1);
        self.prev_times[5] = time;
    }
}
