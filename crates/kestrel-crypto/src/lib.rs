//! Hashing and signature-verification interface for kestrel.
//!
//! Consensus code must depend only on this narrow surface. Signature
//! verification is pluggable: the validator takes a `SignatureVerifier` at
//! construction and never links a curve library itself.

use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(input);
    let out = h.finalize();
    let mut r = [0u8; 32];
    r.copy_from_slice(&out);
    r
}

/// Double SHA-256, the block and transaction hash function.
pub fn sha256d(input: &[u8]) -> [u8; 32] {
    sha256(&sha256(input))
}

/// RIPEMD-160 of SHA-256, the script hash function.
pub fn hash160(input: &[u8]) -> [u8; 20] {
    use ripemd::Ripemd160;
    let mut h = Ripemd160::new();
    h.update(sha256(input));
    let out = h.finalize();
    let mut r = [0u8; 20];
    r.copy_from_slice(&out);
    r
}

pub trait SignatureVerifier {
    /// Verify a DER-encoded ECDSA signature over a 32-byte signature hash.
    ///
    /// `Ok(false)` means the signature does not check out (peer fault);
    /// `Err` means the verifier itself failed (our fault).
    fn verify_ecdsa(
        &self,
        pubkey: &[u8],
        signature: &[u8],
        digest32: &[u8; 32],
    ) -> Result<bool, String>;
}

/// Development-only verifier. Rejects every signature, so chains validated
/// with it can never accept a signature-bearing spend. It exists to unblock
/// store and reorg tooling before a real curve backend is wired in.
#[cfg(feature = "dev-std")]
pub struct DevStdVerifier;

#[cfg(feature = "dev-std")]
impl SignatureVerifier for DevStdVerifier {
    fn verify_ecdsa(
        &self,
        _pubkey: &[u8],
        _signature: &[u8],
        _digest32: &[u8; 32],
    ) -> Result<bool, String> {
        Ok(false)
    }
}
