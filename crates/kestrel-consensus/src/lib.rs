//! Consensus primitives for kestrel: wire codec, hashing domains, Merkle
//! roots, target arithmetic, proof of work, subsidy, transaction checks and
//! legacy script execution.
//!
//! Chain state and storage live in `kestrel-chain`; this crate is pure
//! computation over byte slices and parsed structures.

mod block;
mod encode;
mod error;
mod merkle;
mod params;
mod parse;
mod pow;
mod script;
mod sighash;
mod subsidy;
mod tx;
mod wire;

pub use block::{block_hash, block_header_bytes, parse_block_header, Block, BlockHeader,
    BLOCK_HEADER_BYTES};
pub use encode::{block_bytes, tx_bytes, tx_output_bytes};
pub use error::{ConsensusError, ErrorCode};
pub use merkle::merkle_root;
pub use params::{Consensus, Mainnet};
pub use parse::{parse_block_bytes, parse_block_prefix, parse_tx_bytes, parse_tx_output_prefix};
pub use pow::{block_work, check_proof_of_work, compact_from_target, expand_target, retarget};
pub use script::{
    cast_to_bool, execute, is_p2sh, is_push_only, sig_op_count, ScriptResult, SigContext,
};
pub use sighash::{
    signature_hash, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};
pub use subsidy::block_reward;
pub use tx::{is_coinbase, is_final, tx_hash, validate_basic, OutPoint, Tx, TxInput, TxOutput,
    TxSummary};
pub use wire::{var_int_decode, var_int_encode};

/// One hundred million base units.
pub const COIN: u64 = 100_000_000;

/// Money supply ceiling; no value or value sum may exceed it.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Maximum allowed compact target (lowest difficulty).
pub const MAX_TARGET: u32 = 0x1d00_ffff;

/// Signature-operation budget per block.
pub const MAX_SIG_OPS: u32 = 20_000;

/// Depth a coinbase output must reach before it may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Blocks per difficulty window.
pub const RETARGET_INTERVAL: u32 = 2_016;

/// Expected seconds per difficulty window (two weeks).
pub const TARGET_TIMESPAN: u32 = 14 * 24 * 60 * 60;

/// Seconds a block timestamp may run ahead of network time.
pub const MAX_TIME_DRIFT: u64 = 7_200;

/// Lock times below this are heights, at or above it timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u32 = 210_000;

/// Sequence value that opts an input out of lock-time rules.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Previous-output index of the coinbase null outpoint.
pub const COINBASE_PREVOUT_INDEX: u32 = 0xffff_ffff;

/// Coinbase input script length bounds.
pub const MIN_COINBASE_SCRIPT: usize = 2;
pub const MAX_COINBASE_SCRIPT: usize = 100;
