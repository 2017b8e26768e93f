use kestrel_crypto::sha256d;

use crate::error::{ConsensusError, ErrorCode};
use crate::tx::Tx;

pub const BLOCK_HEADER_BYTES: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub target: u32,
    pub nonce: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

pub fn block_header_bytes(h: &BlockHeader) -> [u8; BLOCK_HEADER_BYTES] {
    let mut out = [0u8; BLOCK_HEADER_BYTES];
    out[0..4].copy_from_slice(&h.version.to_le_bytes());
    out[4..36].copy_from_slice(&h.prev_block_hash);
    out[36..68].copy_from_slice(&h.merkle_root);
    out[68..72].copy_from_slice(&h.time.to_le_bytes());
    out[72..76].copy_from_slice(&h.target.to_le_bytes());
    out[76..80].copy_from_slice(&h.nonce.to_le_bytes());
    out
}

pub fn parse_block_header(b: &[u8]) -> Result<BlockHeader, ConsensusError> {
    if b.len() < BLOCK_HEADER_BYTES {
        return Err(ConsensusError::new(
            ErrorCode::Parse,
            "block header truncated",
        ));
    }
    let mut prev_block_hash = [0u8; 32];
    prev_block_hash.copy_from_slice(&b[4..36]);
    let mut merkle_root = [0u8; 32];
    merkle_root.copy_from_slice(&b[36..68]);
    Ok(BlockHeader {
        version: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        prev_block_hash,
        merkle_root,
        time: u32::from_le_bytes([b[68], b[69], b[70], b[71]]),
        target: u32::from_le_bytes([b[72], b[73], b[74], b[75]]),
        nonce: u32::from_le_bytes([b[76], b[77], b[78], b[79]]),
    })
}

/// Double SHA-256 over the 80 serialized header bytes.
pub fn block_hash(header: &BlockHeader) -> [u8; 32] {
    sha256d(&block_header_bytes(header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = BlockHeader {
            version: 1,
            prev_block_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 1231469665,
            target: 0x1d00ffff,
            nonce: 2573394689,
        };
        let bytes = block_header_bytes(&h);
        assert_eq!(parse_block_header(&bytes).unwrap(), h);
    }
}
