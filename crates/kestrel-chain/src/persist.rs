//! Serialization of validator and branch state.
//!
//! `validation.dat` carries the global picture (main branch, branch count,
//! orphans); each `branch<n>.dat` carries one branch's references, unspent
//! outputs and cumulative work. Files are replaced atomically: write a
//! unique temp file, fsync, rename over the target, fsync the directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;

use kestrel_consensus::{block_hash, parse_block_prefix};

use crate::branch::Branch;
use crate::error::ChainError;
use crate::index::{BlockRef, BranchIndex, HashIndexEntry};
use crate::orphans::{Orphan, OrphanPool};
use crate::store::FileRef;
use crate::utxo::{OutputRef, UnspentOutputIndex};
use crate::{MAX_BRANCHES, MAX_ORPHANS};

pub const VALIDATION_FILE: &str = "validation.dat";

pub fn validation_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(VALIDATION_FILE)
}

pub fn branch_file_path(data_dir: &Path, id: u8) -> PathBuf {
    data_dir.join(format!("branch{id}.dat"))
}

/// Atomic file replacement: unique temp name to dodge cross-process
/// collisions, fsync before rename, directory fsync after.
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), ChainError> {
    let dir = path
        .parent()
        .ok_or_else(|| ChainError::corrupt("target path has no parent directory"))?;
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{pid}.{nanos}"));

    let mut f = fs::File::create(&tmp_path)?;
    if let Err(e) = f.write_all(bytes).and_then(|_| f.sync_all()) {
        drop(f);
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    drop(f);
    fs::rename(&tmp_path, path)?;
    if let Ok(dir_f) = fs::File::open(dir) {
        let _ = dir_f.sync_all();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Little-endian reader over a byte slice
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ChainError> {
        if self.bytes.len().saturating_sub(self.pos) < len {
            return Err(ChainError::corrupt("state file truncated"));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    fn u8(&mut self) -> Result<u8, ChainError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ChainError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ChainError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ChainError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn hash(&mut self) -> Result<[u8; 32], ChainError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Branch file codec
// ---------------------------------------------------------------------------

pub fn encode_branch(branch: &Branch) -> Vec<u8> {
    let positions = branch.index.lookup_positions();
    let mut out = Vec::new();
    out.extend_from_slice(&(branch.index.refs.len() as u32).to_le_bytes());
    for (i, r) in branch.index.refs.iter().enumerate() {
        out.extend_from_slice(&r.file.file_id.to_le_bytes());
        out.extend_from_slice(&r.file.file_pos.to_le_bytes());
        out.extend_from_slice(&r.target.to_le_bytes());
        out.extend_from_slice(&r.time.to_le_bytes());
        out.extend_from_slice(&r.hash);
        out.extend_from_slice(&positions[i].to_le_bytes());
    }
    out.extend_from_slice(&branch.last_retarget_time.to_le_bytes());
    out.push(branch.parent_branch);
    out.extend_from_slice(&branch.parent_block_index.to_le_bytes());
    out.extend_from_slice(&branch.start_height.to_le_bytes());
    out.extend_from_slice(&branch.last_validated_index.to_le_bytes());
    out.extend_from_slice(&(branch.unspent.len() as u32).to_le_bytes());
    for entry in branch.unspent.entries() {
        out.extend_from_slice(&entry.tx_hash);
        out.extend_from_slice(&entry.output_index.to_le_bytes());
        out.extend_from_slice(&entry.file.file_id.to_le_bytes());
        out.extend_from_slice(&entry.file.file_pos.to_le_bytes());
        out.extend_from_slice(&entry.height.to_le_bytes());
        out.push(entry.coinbase as u8);
        out.push(entry.branch);
    }
    let work_bytes = branch.work.to_bytes_be();
    out.push(work_bytes.len() as u8);
    out.extend_from_slice(&work_bytes);
    out
}

/// Decode a branch file. `prev_times` is left at zero; the caller rebuilds
/// it from the reference arrays once every branch is in memory.
pub fn decode_branch(bytes: &[u8]) -> Result<Branch, ChainError> {
    let mut r = Reader::new(bytes);
    let num_refs = r.u32()? as usize;
    if num_refs > bytes.len() / 54 + 1 {
        return Err(ChainError::corrupt("reference count exceeds file size"));
    }
    let mut refs = Vec::with_capacity(num_refs);
    let mut lookup: Vec<Option<HashIndexEntry>> = vec![None; num_refs];
    for ref_index in 0..num_refs {
        let file_id = r.u16()?;
        let file_pos = r.u64()?;
        let target = r.u32()?;
        let time = r.u32()?;
        let hash = r.hash()?;
        let position = r.u32()? as usize;
        refs.push(BlockRef {
            file: FileRef { file_id, file_pos },
            target,
            time,
            hash,
        });
        let slot = lookup
            .get_mut(position)
            .ok_or_else(|| ChainError::corrupt("lookup position out of range"))?;
        if slot.is_some() {
            return Err(ChainError::corrupt("duplicate lookup position"));
        }
        *slot = Some(HashIndexEntry {
            block_hash: hash,
            ref_index: ref_index as u32,
        });
    }
    let mut lookup_entries = Vec::with_capacity(num_refs);
    for slot in lookup {
        lookup_entries
            .push(slot.ok_or_else(|| ChainError::corrupt("lookup position missing"))?);
    }
    for pair in lookup_entries.windows(2) {
        if pair[0].block_hash >= pair[1].block_hash {
            return Err(ChainError::corrupt("lookup table not strictly sorted"));
        }
    }

    let last_retarget_time = r.u32()?;
    let parent_branch = r.u8()?;
    let parent_block_index = r.u32()?;
    let start_height = r.u32()?;
    let last_validated_index = r.u32()?;
    if last_validated_index as usize > num_refs {
        return Err(ChainError::corrupt("validated index beyond references"));
    }

    let num_unspent = r.u32()? as usize;
    if num_unspent > bytes.len() / 52 + 1 {
        return Err(ChainError::corrupt("unspent count exceeds file size"));
    }
    let mut unspent = Vec::with_capacity(num_unspent);
    for _ in 0..num_unspent {
        let tx_hash = r.hash()?;
        let output_index = r.u32()?;
        let file_id = r.u16()?;
        let file_pos = r.u64()?;
        let height = r.u32()?;
        let coinbase = r.u8()? != 0;
        let branch = r.u8()?;
        unspent.push(OutputRef {
            tx_hash,
            output_index,
            file: FileRef { file_id, file_pos },
            height,
            coinbase,
            branch,
        });
    }

    let work_len = r.u8()? as usize;
    let work = BigUint::from_bytes_be(r.take(work_len)?);

    Ok(Branch {
        index: BranchIndex {
            refs,
            lookup: lookup_entries,
        },
        unspent: UnspentOutputIndex::from_entries(unspent),
        parent_branch,
        parent_block_index,
        start_height,
        last_validated_index,
        last_retarget_time,
        prev_times: [0; 6],
        work,
    })
}

// ---------------------------------------------------------------------------
// Validation file codec
// ---------------------------------------------------------------------------

pub fn encode_validator(main_branch: u8, num_branches: u8, orphans: &OrphanPool) -> Vec<u8> {
    let mut out = vec![main_branch, num_branches, orphans.len() as u8];
    for orphan in orphans.iter() {
        out.extend_from_slice(&orphan.bytes);
    }
    out
}

pub struct LoadedState {
    pub main_branch: u8,
    pub branches: Vec<Branch>,
    pub orphans: Vec<Orphan>,
}

/// Load persisted state, or `None` on a fresh data directory.
pub fn load(data_dir: &Path) -> Result<Option<LoadedState>, ChainError> {
    let bytes = match fs::read(validation_file_path(data_dir)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() < 3 {
        return Err(ChainError::corrupt("validation file shorter than header"));
    }
    let main_branch = bytes[0];
    let num_branches = bytes[1] as usize;
    let num_orphans = bytes[2] as usize;
    if num_branches == 0 || num_branches > MAX_BRANCHES {
        return Err(ChainError::corrupt("branch count out of range"));
    }
    if main_branch as usize >= num_branches {
        return Err(ChainError::corrupt("main branch out of range"));
    }
    if num_orphans > MAX_ORPHANS {
        return Err(ChainError::corrupt("orphan count out of range"));
    }

    let mut orphans = Vec::with_capacity(num_orphans);
    let mut cursor = 3usize;
    for _ in 0..num_orphans {
        let (block, consumed) = parse_block_prefix(&bytes[cursor..])
            .map_err(|e| ChainError::corrupt(format!("stored orphan: {e}")))?;
        orphans.push(Orphan {
            bytes: bytes[cursor..cursor + consumed].to_vec(),
            hash: block_hash(&block.header),
        });
        cursor += consumed;
    }

    let mut branches = Vec::with_capacity(num_branches);
    for id in 0..num_branches {
        let branch_bytes = fs::read(branch_file_path(data_dir, id as u8))?;
        branches.push(decode_branch(&branch_bytes)?);
    }

    Ok(Some(LoadedState {
        main_branch,
        branches,
        orphans,
    }))
}

pub fn save_validator(
    data_dir: &Path,
    main_branch: u8,
    num_branches: u8,
    orphans: &OrphanPool,
) -> Result<(), ChainError> {
    write_file_atomic(
        &validation_file_path(data_dir),
        &encode_validator(main_branch, num_branches, orphans),
    )
}

pub fn save_branch(data_dir: &Path, id: u8, branch: &Branch) -> Result<(), ChainError> {
    write_file_atomic(&branch_file_path(data_dir, id), &encode_branch(branch))
}
