//! The top-level block acceptance state machine.
//!
//! `process_block` classifies each candidate against every known branch,
//! defers transaction validation for side branches, and runs the
//! reorganization walk when a side branch overtakes the main chain. It is
//! the only mutator of chain state; callers hand it blocks one at a time.

use std::fs;
use std::path::{Path, PathBuf};

use num_bigint::BigUint;
use num_traits::Zero;

use kestrel_consensus::{
    block_hash, merkle_root, parse_block_bytes, tx_hash, Block, Consensus, MAX_TIME_DRIFT,
    RETARGET_INTERVAL,
};
use kestrel_crypto::SignatureVerifier;

use crate::branch::Branch;
use crate::error::{ChainError, DiagKind, DiagSink};
use crate::genesis::{GENESIS_BLOCK, GENESIS_COINBASE_HASH};
use crate::index::{BlockRef, BranchIndex};
use crate::orphans::{Orphan, OrphanPool};
use crate::persist;
use crate::store::{BlockStore, FileRef};
use crate::utxo::{output_offsets, OutputRef, UnspentOutputIndex};
use crate::validate::{full_block_validation, BlockValidity};
use crate::MAX_BRANCHES;

/// Disposition of a processed block. Environment failures are not statuses;
/// they surface as `ChainError` and the caller reports them as ERROR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Extended the main chain (possibly by reorganization).
    Main,
    /// Recorded on a side branch without transaction validation.
    Side,
    /// Parent unknown; cached in the orphan pool.
    Orphan,
    /// Already known, either on a branch or as an orphan.
    Duplicate,
    /// Consensus-rule violation.
    Bad,
    /// Timestamp too far past network time.
    BadTime,
    /// Orphan pool or branch set at capacity.
    MaxCache,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockStatus::Main => "MAIN",
            BlockStatus::Side => "SIDE",
            BlockStatus::Orphan => "ORPHAN",
            BlockStatus::Duplicate => "DUPLICATE",
            BlockStatus::Bad => "BAD",
            BlockStatus::BadTime => "BAD_TIME",
            BlockStatus::MaxCache => "MAX_CACHE",
        }
    }
}

pub struct Validator {
    data_dir: PathBuf,
    store: BlockStore,
    branches: Vec<Branch>,
    main_branch: u8,
    orphans: OrphanPool,
    consensus: Box<dyn Consensus>,
    verifier: Box<dyn SignatureVerifier>,
    sink: DiagSink,
}

// ---------------------------------------------------------------------------
// Cross-branch walking helpers. Branches form a tree through
// (parent_branch, parent_block_index) edges; these follow them backwards.
// ---------------------------------------------------------------------------

fn block_ref_at(branches: &[Branch], branch: u8, idx: u32) -> &BlockRef {
    &branches[branch as usize].index.refs[idx as usize]
}

fn step_back(branches: &[Branch], branch: u8, idx: u32) -> Option<(u8, u32)> {
    if idx > 0 {
        return Some((branch, idx - 1));
    }
    if branch == 0 {
        return None;
    }
    let b = &branches[branch as usize];
    Some((b.parent_branch, b.parent_block_index))
}

/// The six timestamps ending at the block at (branch, idx), oldest first.
/// Positions before genesis repeat the earliest known time.
fn prev_times_at(branches: &[Branch], branch: u8, idx: u32) -> [u32; 6] {
    let mut times = [0u32; 6];
    let mut cursor = Some((branch, idx));
    for slot in (0..6).rev() {
        match cursor {
            Some((b, i)) => {
                times[slot] = block_ref_at(branches, b, i).time;
                cursor = step_back(branches, b, i);
            }
            None => times[slot] = times[slot + 1],
        }
    }
    times
}

/// Record an accepted block on its branch: reference at the tail, work and
/// timestamp caches updated, retarget time refreshed on a window boundary.
fn record_block(branch: &mut Branch, hash: [u8; 32], block: &Block, at: FileRef, new_work: BigUint) {
    let new_height = branch.next_height();
    branch.index.push(BlockRef {
        file: at,
        target: block.header.target,
        time: block.header.time,
        hash,
    });
    branch.work = new_work;
    branch.rotate_prev_times(block.header.time);
    if new_height % RETARGET_INTERVAL == 0 {
        branch.last_retarget_time = block.header.time;
    }
}

/// Apply a block's spends and outputs to an unspent view. Output locators
/// point into the stored record: block position, plus the length prefix,
/// plus the output's offset inside the block.
fn apply_block_to_utxo(
    utxo: &mut UnspentOutputIndex,
    block: &Block,
    tx_hashes: &[[u8; 32]],
    block_bytes: &[u8],
    at: FileRef,
    height: u32,
    branch_id: u8,
) -> Result<(), ChainError> {
    let offsets = output_offsets(block_bytes)
        .map_err(|e| ChainError::corrupt(format!("offset walk: {e}")))?;
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        if tx_index > 0 {
            for input in &tx.inputs {
                utxo.remove(&input.prev_out.tx_hash, input.prev_out.index)
                    .ok_or_else(|| {
                        ChainError::corrupt("spent output missing from unspent view")
                    })?;
            }
        }
        for output_index in 0..tx.outputs.len() {
            utxo.insert(OutputRef {
                tx_hash: tx_hashes[tx_index],
                output_index: output_index as u32,
                file: FileRef {
                    file_id: at.file_id,
                    file_pos: at.file_pos + 4 + offsets[tx_index][output_index] as u64,
                },
                height,
                coinbase: tx_index == 0,
                branch: branch_id,
            });
        }
    }
    Ok(())
}

enum ReplayOutcome {
    Replayed {
        working: UnspentOutputIndex,
        validated: Vec<(u8, u32)>,
    },
    Bad(&'static str),
}

impl Validator {
    /// Open the validator over `data_dir`, loading persisted state or
    /// materializing genesis on a fresh directory.
    pub fn open(
        data_dir: &Path,
        consensus: Box<dyn Consensus>,
        verifier: Box<dyn SignatureVerifier>,
        sink: DiagSink,
    ) -> Result<Self, ChainError> {
        fs::create_dir_all(data_dir)?;
        let mut store = BlockStore::open(data_dir);
        let (branches, main_branch, orphans) = match persist::load(data_dir)? {
            Some(state) => {
                let mut branches = state.branches;
                // The timestamp caches are not persisted; rebuild them from
                // the reference arrays now that every branch is in memory.
                for id in 0..branches.len() {
                    if branches[id].index.is_empty() {
                        continue;
                    }
                    let tip = branches[id].index.len() as u32 - 1;
                    let times = prev_times_at(&branches, id as u8, tip);
                    branches[id].prev_times = times;
                }
                let mut pool = OrphanPool::new();
                for orphan in state.orphans {
                    pool.add(orphan);
                }
                (branches, state.main_branch, pool)
            }
            None => Self::bootstrap(data_dir, &mut store)?,
        };
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            store,
            branches,
            main_branch,
            orphans,
            consensus,
            verifier,
            sink,
        })
    }

    fn bootstrap(
        data_dir: &Path,
        store: &mut BlockStore,
    ) -> Result<(Vec<Branch>, u8, OrphanPool), ChainError> {
        let at = store.append(0, &GENESIS_BLOCK)?;
        if at != (FileRef { file_id: 0, file_pos: 0 }) {
            return Err(ChainError::corrupt(
                "genesis bootstrap over a non-empty block store",
            ));
        }
        let offsets = output_offsets(&GENESIS_BLOCK)
            .map_err(|e| ChainError::corrupt(format!("genesis walk: {e}")))?;
        let mut branch = Branch::genesis();
        branch.unspent.insert(OutputRef {
            tx_hash: GENESIS_COINBASE_HASH,
            output_index: 0,
            file: FileRef {
                file_id: 0,
                file_pos: 4 + offsets[0][0] as u64,
            },
            height: 0,
            coinbase: true,
            branch: 0,
        });
        persist::save_branch(data_dir, 0, &branch)?;
        persist::save_validator(data_dir, 0, 1, &OrphanPool::new())?;
        log::debug!("materialized genesis in {}", data_dir.display());
        Ok((vec![branch], 0, OrphanPool::new()))
    }

    pub fn main_branch(&self) -> u8 {
        self.main_branch
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    fn diag(&self, kind: DiagKind, msg: &str) {
        (self.sink)(kind, msg);
    }

    fn bad(&self, msg: &str) -> BlockStatus {
        self.diag(DiagKind::BadBlock, msg);
        BlockStatus::Bad
    }

    /// Process one candidate block. Total over all peer input: malformed or
    /// rule-breaking blocks come back as statuses, never as errors.
    pub fn process_block(
        &mut self,
        bytes: &[u8],
        network_time: u64,
    ) -> Result<BlockStatus, ChainError> {
        let result = self.process_block_inner(bytes, network_time);
        if let Err(e) = &result {
            self.diag(e.kind(), &e.to_string());
        }
        result
    }

    fn process_block_inner(
        &mut self,
        bytes: &[u8],
        network_time: u64,
    ) -> Result<BlockStatus, ChainError> {
        // Cheap validation first: nothing here touches the disk beyond the
        // hash lookups.
        let block = match parse_block_bytes(bytes) {
            Ok(block) => block,
            Err(e) => {
                self.diag(DiagKind::BadBlock, &format!("unparseable block: {e}"));
                return Ok(BlockStatus::Bad);
            }
        };
        let hash = block_hash(&block.header);
        if self.orphans.contains(&hash)
            || self.branches.iter().any(|b| b.index.contains(&hash))
        {
            self.diag(DiagKind::Duplicate, &hex::encode(hash));
            return Ok(BlockStatus::Duplicate);
        }
        if block.transactions.is_empty() {
            return Ok(self.bad("no transactions"));
        }
        if !self.consensus.proof_of_work(&hash, block.header.target) {
            return Ok(self.bad("proof of work"));
        }
        if block.header.time as u64 > network_time + MAX_TIME_DRIFT {
            self.diag(DiagKind::BadBlock, "timestamp past the drift limit");
            return Ok(BlockStatus::BadTime);
        }
        let tx_hashes: Vec<[u8; 32]> = block.transactions.iter().map(tx_hash).collect();
        match merkle_root(&tx_hashes) {
            Ok(root) if root == block.header.merkle_root => {}
            _ => return Ok(self.bad("merkle root mismatch")),
        }

        // Parent lookup across every branch.
        let mut parent = None;
        for (id, branch) in self.branches.iter().enumerate() {
            if let Some(idx) = branch.index.ref_index_of(&block.header.prev_block_hash) {
                parent = Some((id as u8, idx));
                break;
            }
        }
        let Some((parent_branch, parent_index)) = parent else {
            if self.orphans.is_full() {
                self.diag(DiagKind::CacheFull, "orphan pool full");
                return Ok(BlockStatus::MaxCache);
            }
            self.orphans.add(Orphan {
                bytes: bytes.to_vec(),
                hash,
            });
            if let Err(e) = persist::save_validator(
                &self.data_dir,
                self.main_branch,
                self.branches.len() as u8,
                &self.orphans,
            ) {
                self.orphans.pop();
                return Err(e);
            }
            return Ok(BlockStatus::Orphan);
        };

        // Extension of a branch tip, or a fresh side branch off an interior
        // block.
        let parent_is_tip =
            parent_index as usize + 1 == self.branches[parent_branch as usize].index.len();
        let (branch_id, created) = if parent_is_tip {
            (parent_branch, false)
        } else {
            if self.branches.len() >= MAX_BRANCHES {
                self.diag(DiagKind::CacheFull, "branch set full");
                return Ok(BlockStatus::MaxCache);
            }
            let branch = self.fork_branch(parent_branch, parent_index);
            self.branches.push(branch);
            ((self.branches.len() - 1) as u8, true)
        };

        let result = self.accept_on_branch(branch_id, hash, &block, &tx_hashes, bytes);
        match result {
            Ok(BlockStatus::Main) | Ok(BlockStatus::Side) => result,
            other => {
                // The block was not recorded; a branch allocated for it goes
                // away again.
                if created {
                    self.branches.pop();
                }
                other
            }
        }
    }

    /// Branch state for a fork at (parent_branch, parent_index): the parent
    /// lineage's state at the fork block, with the work of everything past
    /// the fork subtracted back out.
    fn fork_branch(&self, parent_branch: u8, parent_index: u32) -> Branch {
        let parent = &self.branches[parent_branch as usize];
        let fork_height = parent.height_of(parent_index);
        let mut work = parent.work.clone();
        for r in &parent.index.refs[parent_index as usize + 1..] {
            work -= self.consensus.block_work(r.target);
        }
        let prev_times = prev_times_at(&self.branches, parent_branch, parent_index);
        let mut cursor = (parent_branch, parent_index);
        for _ in 0..(fork_height % RETARGET_INTERVAL) {
            match step_back(&self.branches, cursor.0, cursor.1) {
                Some(prev) => cursor = prev,
                None => break,
            }
        }
        let last_retarget_time = block_ref_at(&self.branches, cursor.0, cursor.1).time;
        Branch {
            index: BranchIndex::new(),
            unspent: UnspentOutputIndex::new(),
            parent_branch,
            parent_block_index: parent_index,
            start_height: fork_height + 1,
            last_validated_index: 0,
            last_retarget_time,
            prev_times,
            work,
        }
    }

    /// Compact target in force at the end of a branch: its tip, or for a
    /// branch with no references yet, its fork block.
    fn parent_target(&self, branch_id: u8) -> u32 {
        let branch = &self.branches[branch_id as usize];
        match branch.tip() {
            Some(tip) => tip.target,
            None => {
                block_ref_at(&self.branches, branch.parent_branch, branch.parent_block_index)
                    .target
            }
        }
    }

    fn accept_on_branch(
        &mut self,
        branch_id: u8,
        hash: [u8; 32],
        block: &Block,
        tx_hashes: &[[u8; 32]],
        bytes: &[u8],
    ) -> Result<BlockStatus, ChainError> {
        let new_height = self.branches[branch_id as usize].next_height();

        // Header-level checks against the branch caches.
        {
            let branch = &self.branches[branch_id as usize];
            if block.header.time < branch.prev_times[0] {
                return Ok(self.bad("timestamp below the six-back floor"));
            }
            let parent_target = self.parent_target(branch_id);
            let expected_target = if new_height % RETARGET_INTERVAL == 0 {
                self.consensus.retarget(
                    parent_target,
                    block.header.time.saturating_sub(branch.last_retarget_time),
                )
            } else {
                parent_target
            };
            if block.header.target != expected_target {
                return Ok(self.bad("target does not match the expected difficulty"));
            }
        }
        let new_work = &self.branches[branch_id as usize].work
            + self.consensus.block_work(block.header.target);

        // A side branch that does not overtake the main chain is recorded
        // without transaction validation.
        if branch_id != self.main_branch
            && new_work <= self.branches[self.main_branch as usize].work
        {
            self.commit_side(branch_id, hash, block, bytes, new_work)?;
            return Ok(BlockStatus::Side);
        }

        // This block lands on the active chain.
        if branch_id == self.main_branch && self.branches[branch_id as usize].fully_validated()
        {
            // Plain extension: validate against the live unspent view.
            match full_block_validation(
                block,
                tx_hashes,
                new_height,
                &self.branches[branch_id as usize].unspent,
                &mut self.store,
                self.consensus.as_ref(),
                self.verifier.as_ref(),
            )? {
                BlockValidity::Valid => {}
                BlockValidity::Bad(msg) => return Ok(self.bad(msg)),
            }
            self.commit_main_extension(branch_id, hash, block, tx_hashes, bytes, new_work)?;
            return Ok(BlockStatus::Main);
        }

        // Reorganization: rebuild the unspent view along this branch's
        // lineage, fully validating every block that was deferred.
        match self.revalidate_lineage(branch_id)? {
            ReplayOutcome::Bad(msg) => Ok(self.bad(msg)),
            ReplayOutcome::Replayed {
                mut working,
                validated,
            } => {
                match full_block_validation(
                    block,
                    tx_hashes,
                    new_height,
                    &working,
                    &mut self.store,
                    self.consensus.as_ref(),
                    self.verifier.as_ref(),
                )? {
                    BlockValidity::Valid => {}
                    BlockValidity::Bad(msg) => return Ok(self.bad(msg)),
                }
                let at = self.store.append(branch_id, bytes)?;
                apply_block_to_utxo(
                    &mut working, block, tx_hashes, bytes, at, new_height, branch_id,
                )?;
                for (br, count) in &validated {
                    let b = &mut self.branches[*br as usize];
                    if b.last_validated_index < *count {
                        b.last_validated_index = *count;
                    }
                }
                {
                    let branch = &mut self.branches[branch_id as usize];
                    record_block(branch, hash, block, at, new_work);
                    branch.unspent = working;
                    branch.last_validated_index = branch.index.len() as u32;
                }
                let old_main = self.main_branch;
                self.main_branch = branch_id;
                log::info!(
                    "reorganized: branch {} replaces branch {} at height {}",
                    branch_id,
                    old_main,
                    new_height
                );
                for (br, _) in &validated {
                    persist::save_branch(&self.data_dir, *br, &self.branches[*br as usize])?;
                }
                persist::save_validator(
                    &self.data_dir,
                    self.main_branch,
                    self.branches.len() as u8,
                    &self.orphans,
                )?;
                Ok(BlockStatus::Main)
            }
        }
    }

    /// Walk this branch's lineage from genesis, replaying every block into a
    /// fresh unspent view. Blocks below their branch's validated watermark
    /// replay without script checks; the deferred remainder gets full
    /// validation. Returns the rebuilt view and the per-branch watermarks to
    /// advance on commit.
    fn revalidate_lineage(&mut self, branch_id: u8) -> Result<ReplayOutcome, ChainError> {
        let segments = self.lineage(branch_id);
        let mut working = UnspentOutputIndex::new();
        let mut validated = Vec::with_capacity(segments.len());
        for (br, count) in segments {
            for idx in 0..count {
                let (at, height, already_validated) = {
                    let b = &self.branches[br as usize];
                    (
                        b.index.refs[idx as usize].file,
                        b.height_of(idx),
                        idx < b.last_validated_index,
                    )
                };
                let stored = self.store.read(br, at)?;
                let block = parse_block_bytes(&stored)
                    .map_err(|e| ChainError::corrupt(format!("stored block: {e}")))?;
                let hashes: Vec<[u8; 32]> = block.transactions.iter().map(tx_hash).collect();
                if !already_validated {
                    match full_block_validation(
                        &block,
                        &hashes,
                        height,
                        &working,
                        &mut self.store,
                        self.consensus.as_ref(),
                        self.verifier.as_ref(),
                    )? {
                        BlockValidity::Valid => {}
                        BlockValidity::Bad(msg) => return Ok(ReplayOutcome::Bad(msg)),
                    }
                }
                apply_block_to_utxo(&mut working, &block, &hashes, &stored, at, height, br)?;
            }
            validated.push((br, count));
        }
        Ok(ReplayOutcome::Replayed { working, validated })
    }

    /// The lineage of a branch as (branch, reference count) segments from
    /// genesis to its tip. Parent ids strictly decrease, so this terminates.
    fn lineage(&self, branch_id: u8) -> Vec<(u8, u32)> {
        let mut segments = Vec::new();
        let mut cur = branch_id;
        let mut count = self.branches[branch_id as usize].index.len() as u32;
        loop {
            segments.push((cur, count));
            if cur == 0 {
                break;
            }
            let b = &self.branches[cur as usize];
            count = b.parent_block_index + 1;
            cur = b.parent_branch;
        }
        segments.reverse();
        segments
    }

    fn commit_side(
        &mut self,
        branch_id: u8,
        hash: [u8; 32],
        block: &Block,
        bytes: &[u8],
        new_work: BigUint,
    ) -> Result<(), ChainError> {
        let at = self.store.append(branch_id, bytes)?;
        {
            let branch = &mut self.branches[branch_id as usize];
            record_block(branch, hash, block, at, new_work);
        }
        persist::save_branch(
            &self.data_dir,
            branch_id,
            &self.branches[branch_id as usize],
        )?;
        persist::save_validator(
            &self.data_dir,
            self.main_branch,
            self.branches.len() as u8,
            &self.orphans,
        )
    }

    fn commit_main_extension(
        &mut self,
        branch_id: u8,
        hash: [u8; 32],
        block: &Block,
        tx_hashes: &[[u8; 32]],
        bytes: &[u8],
        new_work: BigUint,
    ) -> Result<(), ChainError> {
        let at = self.store.append(branch_id, bytes)?;
        {
            let branch = &mut self.branches[branch_id as usize];
            let new_height = branch.next_height();
            apply_block_to_utxo(
                &mut branch.unspent,
                block,
                tx_hashes,
                bytes,
                at,
                new_height,
                branch_id,
            )?;
            record_block(branch, hash, block, at, new_work);
            branch.last_validated_index = branch.index.len() as u32;
        }
        persist::save_branch(
            &self.data_dir,
            branch_id,
            &self.branches[branch_id as usize],
        )?;
        persist::save_validator(
            &self.data_dir,
            self.main_branch,
            self.branches.len() as u8,
            &self.orphans,
        )
    }

    /// Structural invariants, checked by tests after accepts and reloads:
    /// aligned index lengths, strictly sorted tables, resolvable lookup
    /// entries, per-branch work sums and main-branch maximality.
    pub fn verify_invariants(&self) -> Result<(), ChainError> {
        for (id, branch) in self.branches.iter().enumerate() {
            if branch.index.refs.len() != branch.index.lookup.len() {
                return Err(ChainError::corrupt(format!(
                    "branch {id}: reference and lookup lengths differ"
                )));
            }
            for pair in branch.index.lookup.windows(2) {
                if pair[0].block_hash >= pair[1].block_hash {
                    return Err(ChainError::corrupt(format!(
                        "branch {id}: lookup table not strictly sorted"
                    )));
                }
            }
            for entry in &branch.index.lookup {
                let Some(r) = branch.index.refs.get(entry.ref_index as usize) else {
                    return Err(ChainError::corrupt(format!(
                        "branch {id}: lookup entry past the reference array"
                    )));
                };
                if r.hash != entry.block_hash {
                    return Err(ChainError::corrupt(format!(
                        "branch {id}: lookup hash does not match its reference"
                    )));
                }
            }
            for pair in branch.unspent.entries().windows(2) {
                if (pair[0].tx_hash, pair[0].output_index)
                    >= (pair[1].tx_hash, pair[1].output_index)
                {
                    return Err(ChainError::corrupt(format!(
                        "branch {id}: unspent set not strictly sorted"
                    )));
                }
            }
            // Work must equal the sum over the lineage, genesis excluded.
            let mut expected = BigUint::zero();
            for (br, count) in self.lineage(id as u8) {
                for idx in 0..count {
                    if br == 0 && idx == 0 {
                        continue;
                    }
                    expected += self
                        .consensus
                        .block_work(block_ref_at(&self.branches, br, idx).target);
                }
            }
            if expected != branch.work {
                return Err(ChainError::corrupt(format!(
                    "branch {id}: cumulative work does not match its lineage"
                )));
            }
        }
        let heaviest = self
            .branches
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.work.cmp(&b.1.work))
            .map(|(id, _)| id);
        if let Some(heaviest) = heaviest {
            if self.branches[heaviest].work > self.branches[self.main_branch as usize].work {
                return Err(ChainError::corrupt("main branch is not the heaviest"));
            }
        }
        Ok(())
    }
}
