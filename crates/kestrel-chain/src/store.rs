//! Append-only block storage.
//!
//! Each branch owns a set of size-capped files `blocks<branch>-<id>.dat`
//! holding length-prefixed serialized blocks. Open handles live in a bounded
//! LRU cache; the bound is the process file-descriptor ceiling minus a
//! reserve for the validation, address and scratch files.

use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lru_cache::LruCache;

use crate::error::ChainError;

/// Handles held back from the cache for the validator's own files.
const HANDLE_RESERVE: usize = 3;

/// Locates a stored record: which file of a branch, and where in it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: u16,
    pub file_pos: u64,
}

pub struct BlockStore {
    data_dir: PathBuf,
    handles: LruCache<(u8, u16), fs::File>,
    max_handles: usize,
    file_size_limit: u64,
}

impl BlockStore {
    /// Open a store rooted at `data_dir`, sizing its limits from the
    /// process resource limits at this moment.
    pub fn open(data_dir: &Path) -> Self {
        let max_handles = open_files_limit().saturating_sub(HANDLE_RESERVE).max(1);
        Self::with_limits(data_dir, file_size_limit(), max_handles)
    }

    pub fn with_limits(data_dir: &Path, file_size_limit: u64, max_handles: usize) -> Self {
        let max_handles = max_handles.max(1);
        Self {
            data_dir: data_dir.to_path_buf(),
            handles: LruCache::new(max_handles),
            max_handles,
            file_size_limit,
        }
    }

    pub fn block_file_path(&self, branch: u8, file_id: u16) -> PathBuf {
        self.data_dir.join(format!("blocks{branch}-{file_id}.dat"))
    }

    fn handle(&mut self, branch: u8, file_id: u16) -> Result<&mut fs::File, ChainError> {
        let key = (branch, file_id);
        if !self.handles.contains_key(&key) {
            while self.handles.len() >= self.max_handles {
                // Evict the coldest handle, flushing it before the close.
                if let Some((evicted_key, evicted)) = self.handles.remove_lru() {
                    if let Err(e) = evicted.sync_all() {
                        log::warn!(
                            "flush on evict failed for blocks{}-{}.dat: {}",
                            evicted_key.0,
                            evicted_key.1,
                            e
                        );
                    }
                } else {
                    break;
                }
            }
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(self.block_file_path(branch, file_id))?;
            self.handles.insert(key, file);
        }
        self.handles
            .get_mut(&key)
            .ok_or_else(|| ChainError::corrupt("handle cache lost a just-inserted entry"))
    }

    /// Append one length-prefixed block record to the given branch's files.
    /// The record goes into the lowest-numbered file with room under the
    /// per-file size cap, otherwise into a fresh file. A short write is
    /// truncated away before the error surfaces, so no half-written record
    /// is ever observable.
    pub fn append(&mut self, branch: u8, bytes: &[u8]) -> Result<FileRef, ChainError> {
        if bytes.len() as u64 > u32::MAX as u64 {
            return Err(ChainError::corrupt("block larger than the record format"));
        }
        let record_len = 4 + bytes.len() as u64;
        let mut file_id: u16 = 0;
        let (file_id, file_pos) = loop {
            match fs::metadata(self.block_file_path(branch, file_id)) {
                Ok(meta) => {
                    if meta.len().saturating_add(record_len) <= self.file_size_limit {
                        break (file_id, meta.len());
                    }
                    file_id = file_id.checked_add(1).ok_or_else(|| {
                        ChainError::corrupt("block file id space exhausted")
                    })?;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => break (file_id, 0),
                Err(e) => return Err(e.into()),
            }
        };
        let file = self.handle(branch, file_id)?;
        file.seek(SeekFrom::Start(file_pos))?;
        let mut record = Vec::with_capacity(bytes.len() + 4);
        record.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(bytes);
        if let Err(e) = file.write_all(&record) {
            let _ = file.set_len(file_pos);
            return Err(e.into());
        }
        if let Err(e) = file.sync_data() {
            let _ = file.set_len(file_pos);
            return Err(e.into());
        }
        log::debug!(
            "appended {} bytes to blocks{}-{}.dat at {}",
            record.len(),
            branch,
            file_id,
            file_pos
        );
        Ok(FileRef { file_id, file_pos })
    }

    /// Read one block record. A record that runs past the end of its file is
    /// corrupt, not an I/O failure.
    pub fn read(&mut self, branch: u8, at: FileRef) -> Result<Vec<u8>, ChainError> {
        let file = self.handle(branch, at.file_id)?;
        file.seek(SeekFrom::Start(at.file_pos))?;
        let mut len_bytes = [0u8; 4];
        read_fully(file, &mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut bytes = vec![0u8; len];
        read_fully(file, &mut bytes)?;
        Ok(bytes)
    }

    /// Read an exact byte range from a branch file, for resolving a single
    /// output out of a stored block without loading the block.
    pub fn read_at(
        &mut self,
        branch: u8,
        at: FileRef,
        len: usize,
    ) -> Result<Vec<u8>, ChainError> {
        let file = self.handle(branch, at.file_id)?;
        file.seek(SeekFrom::Start(at.file_pos))?;
        let mut bytes = vec![0u8; len];
        read_fully(file, &mut bytes)?;
        Ok(bytes)
    }
}

fn read_fully(file: &mut fs::File, buf: &mut [u8]) -> Result<(), ChainError> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ChainError::corrupt("record truncated")
        } else {
            ChainError::Io(e)
        }
    })
}

#[cfg(unix)]
fn file_size_limit() -> u64 {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_FSIZE, &mut rl) };
    if rc != 0 || rl.rlim_cur == libc::RLIM_INFINITY {
        u64::MAX
    } else {
        rl.rlim_cur as u64
    }
}

#[cfg(not(unix))]
fn file_size_limit() -> u64 {
    u64::MAX
}

#[cfg(unix)]
fn open_files_limit() -> usize {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    if rc != 0 || rl.rlim_cur == libc::RLIM_INFINITY {
        256
    } else {
        rl.rlim_cur as usize
    }
}

#[cfg(not(unix))]
fn open_files_limit() -> usize {
    256
}
