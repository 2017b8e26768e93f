//! Chain state for kestrel: block storage, branch indices, the unspent
//! output set, orphan pool, the acceptance state machine and its on-disk
//! persistence.
//!
//! The crate owns the data-directory layout (`validation.dat`,
//! `branch<n>.dat`, `blocks<branch>-<id>.dat`) and the genesis bootstrap.
//! Consensus arithmetic and codecs come from `kestrel-consensus`; signature
//! verification is injected through `kestrel-crypto`.

pub mod branch;
pub mod error;
pub mod genesis;
pub mod index;
pub mod orphans;
pub mod persist;
mod search;
pub mod store;
pub mod utxo;
mod validate;
pub mod validator;

#[cfg(test)]
mod tests;

pub use branch::Branch;
pub use error::{log_sink, ChainError, DiagKind, DiagSink};
pub use index::{BlockRef, BranchIndex, HashIndexEntry};
pub use orphans::{Orphan, OrphanPool};
pub use store::{BlockStore, FileRef};
pub use utxo::{output_offsets, OutputRef, UnspentOutputIndex};
pub use validator::{BlockStatus, Validator};

/// Orphan pool capacity; a fourth orphan is refused with `MAX_CACHE`.
pub const MAX_ORPHANS: usize = 3;

/// Branch cache capacity; a fifth branch is refused with `MAX_CACHE`.
pub const MAX_BRANCHES: usize = 4;
