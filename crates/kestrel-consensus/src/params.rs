use num_bigint::BigUint;

use crate::{pow, subsidy, COINBASE_MATURITY, MAX_SIG_OPS, MAX_TARGET};

/// The consensus rule surface the validator depends on. Production code uses
/// [`Mainnet`]; tests substitute relaxed proof-of-work rules the same way
/// they substitute the signature verifier.
pub trait Consensus {
    /// Proof-of-work check for a block hash against a compact target.
    fn proof_of_work(&self, block_hash: &[u8; 32], target: u32) -> bool;

    /// Expected compact target after a difficulty window closes.
    fn retarget(&self, last_target: u32, actual_timespan: u32) -> u32;

    /// Per-block work contribution, 2^256 / (target + 1).
    fn block_work(&self, target: u32) -> BigUint;

    /// Base block reward before fees.
    fn block_reward(&self, height: u32) -> u64;

    fn max_target(&self) -> u32 {
        MAX_TARGET
    }

    fn coinbase_maturity(&self) -> u32 {
        COINBASE_MATURITY
    }

    fn max_sig_ops(&self) -> u32 {
        MAX_SIG_OPS
    }
}

/// Production rules.
pub struct Mainnet;

impl Consensus for Mainnet {
    fn proof_of_work(&self, block_hash: &[u8; 32], target: u32) -> bool {
        pow::check_proof_of_work(block_hash, target)
    }

    fn retarget(&self, last_target: u32, actual_timespan: u32) -> u32 {
        pow::retarget(last_target, actual_timespan)
    }

    fn block_work(&self, target: u32) -> BigUint {
        pow::block_work(target)
    }

    fn block_reward(&self, height: u32) -> u64 {
        subsidy::block_reward(height)
    }
}
