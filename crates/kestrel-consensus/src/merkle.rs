use kestrel_crypto::sha256d;

use crate::error::{ConsensusError, ErrorCode};

/// Merkle root over transaction hashes: pairwise double SHA-256 of the
/// concatenated children, with an odd node paired against itself.
pub fn merkle_root(tx_hashes: &[[u8; 32]]) -> Result<[u8; 32], ConsensusError> {
    if tx_hashes.is_empty() {
        return Err(ConsensusError::new(ErrorCode::Parse, "merkle: empty tx list"));
    }
    let mut level: Vec<[u8; 32]> = tx_hashes.to_vec();
    let mut concat = [0u8; 64];
    while level.len() > 1 {
        let mut next: Vec<[u8; 32]> = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0usize;
        while i < level.len() {
            let left = &level[i];
            let right = if i + 1 < level.len() {
                &level[i + 1]
            } else {
                left
            };
            concat[..32].copy_from_slice(left);
            concat[32..].copy_from_slice(right);
            next.push(sha256d(&concat));
            i += 2;
        }
        level = next;
    }
    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hash_is_its_own_root() {
        let h = [0x3b; 32];
        assert_eq!(merkle_root(&[h]).unwrap(), h);
    }

    #[test]
    fn odd_level_duplicates_last() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        // Three leaves: root = H(H(a||b) || H(c||c)).
        let mut ab = [0u8; 64];
        ab[..32].copy_from_slice(&a);
        ab[32..].copy_from_slice(&b);
        let mut cc = [0u8; 64];
        cc[..32].copy_from_slice(&c);
        cc[32..].copy_from_slice(&c);
        let mut top = [0u8; 64];
        top[..32].copy_from_slice(&sha256d(&ab));
        top[32..].copy_from_slice(&sha256d(&cc));
        assert_eq!(merkle_root(&[a, b, c]).unwrap(), sha256d(&top));
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(merkle_root(&[]).is_err());
    }
}
