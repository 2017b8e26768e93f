//! The boundary to peer networking. The validator only ever sees candidate
//! block bytes and a network-time estimate; where they come from is the
//! gateway's business.

use std::fs;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of candidate blocks, in arrival order.
pub trait NetworkGateway {
    /// The next candidate block's serialized bytes, or `None` when the
    /// source is drained.
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, String>;

    /// Current network-adjusted time estimate, seconds since the epoch.
    fn network_time(&self) -> u64;
}

/// Replays blocks from a file of `{length: u32 LE, block bytes}` records,
/// the same record shape the block store writes.
pub struct FileGateway {
    bytes: Vec<u8>,
    pos: usize,
    time_offset: i64,
}

impl FileGateway {
    pub fn open(path: &str, time_offset: i64) -> Result<Self, String> {
        let mut bytes = Vec::new();
        fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| format!("open blocks file {path}: {e}"))?;
        Ok(Self {
            bytes,
            pos: 0,
            time_offset,
        })
    }
}

impl NetworkGateway for FileGateway {
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, String> {
        if self.pos == self.bytes.len() {
            return Ok(None);
        }
        if self.bytes.len() - self.pos < 4 {
            return Err("blocks file: truncated length prefix".into());
        }
        let len = u32::from_le_bytes([
            self.bytes[self.pos],
            self.bytes[self.pos + 1],
            self.bytes[self.pos + 2],
            self.bytes[self.pos + 3],
        ]) as usize;
        self.pos += 4;
        if self.bytes.len() - self.pos < len {
            return Err("blocks file: truncated record".into());
        }
        let record = self.bytes[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(Some(record))
    }

    fn network_time(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_add_signed(self.time_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replays_length_prefixed_records() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("blocks");
        let mut f = fs::File::create(&path).expect("create");
        for payload in [&[1u8, 2, 3][..], &[9u8; 10][..]] {
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(payload).unwrap();
        }
        drop(f);

        let mut gw = FileGateway::open(path.to_str().unwrap(), 0).expect("open");
        assert_eq!(gw.next_block().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(gw.next_block().unwrap(), Some(vec![9u8; 10]));
        assert_eq!(gw.next_block().unwrap(), None);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("blocks");
        fs::write(&path, [5u8, 0, 0, 0, 1, 2]).expect("write");
        let mut gw = FileGateway::open(path.to_str().unwrap(), 0).expect("open");
        assert!(gw.next_block().is_err());
    }
}
