//! End-to-end acceptance scenarios: cold and warm start, main-chain
//! extension with the canonical first block, duplicates, orphan limits,
//! side branches and reorganization, and the difficulty-window boundary.

use num_bigint::BigUint;
use num_traits::Zero;
use tempfile::TempDir;

use kestrel_consensus::{
    block_bytes, expand_target, merkle_root, retarget, tx_hash, Block, BlockHeader, Consensus,
    Mainnet, OutPoint, Tx, TxInput, TxOutput, COINBASE_PREVOUT_INDEX, MAX_TARGET,
    RETARGET_INTERVAL, SEQUENCE_FINAL,
};
use kestrel_crypto::SignatureVerifier;

use crate::genesis::{GENESIS_COINBASE_HASH, GENESIS_HASH, GENESIS_TIME};
use crate::validator::{BlockStatus, Validator};
use crate::{DiagSink, MAX_BRANCHES, MAX_ORPHANS};

// ---------------------------------------------------------------------------
// Test doubles: relaxed proof of work (difficulty rules stay real) and an
// accept-all signature backend.
// ---------------------------------------------------------------------------

struct EasyPow;

impl Consensus for EasyPow {
    fn proof_of_work(&self, _block_hash: &[u8; 32], target: u32) -> bool {
        let t = expand_target(target);
        !t.is_zero() && t <= expand_target(MAX_TARGET)
    }

    fn retarget(&self, last_target: u32, actual_timespan: u32) -> u32 {
        Mainnet.retarget(last_target, actual_timespan)
    }

    fn block_work(&self, target: u32) -> BigUint {
        Mainnet.block_work(target)
    }

    fn block_reward(&self, height: u32) -> u64 {
        Mainnet.block_reward(height)
    }
}

struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify_ecdsa(&self, _p: &[u8], _s: &[u8], _d: &[u8; 32]) -> Result<bool, String> {
        Ok(true)
    }
}

fn quiet_sink() -> DiagSink {
    Box::new(|_, _| {})
}

fn open_real(dir: &TempDir) -> Validator {
    Validator::open(
        dir.path(),
        Box::new(Mainnet),
        Box::new(AcceptAll),
        quiet_sink(),
    )
    .expect("open validator")
}

fn open_easy(dir: &TempDir) -> Validator {
    Validator::open(
        dir.path(),
        Box::new(EasyPow),
        Box::new(AcceptAll),
        quiet_sink(),
    )
    .expect("open validator")
}

// ---------------------------------------------------------------------------
// Block construction helpers
// ---------------------------------------------------------------------------

fn null_out_point() -> OutPoint {
    OutPoint {
        tx_hash: [0u8; 32],
        index: COINBASE_PREVOUT_INDEX,
    }
}

fn make_coinbase(value: u64, tag: u64) -> Tx {
    Tx {
        version: 1,
        inputs: vec![TxInput {
            prev_out: null_out_point(),
            script: tag.to_le_bytes().to_vec(),
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TxOutput {
            value,
            script: vec![0x51],
        }],
        lock_time: 0,
    }
}

fn make_block(prev: [u8; 32], time: u32, target: u32, transactions: Vec<Tx>) -> Vec<u8> {
    let hashes: Vec<[u8; 32]> = transactions.iter().map(tx_hash).collect();
    let header = BlockHeader {
        version: 1,
        prev_block_hash: prev,
        merkle_root: merkle_root(&hashes).expect("non-empty"),
        time,
        target,
        nonce: 0,
    };
    block_bytes(&Block {
        header,
        transactions,
    })
}

/// The canonical first block after genesis, byte-for-byte.
fn canonical_block_one() -> Vec<u8> {
    let coinbase = Tx {
        version: 1,
        inputs: vec![TxInput {
            prev_out: null_out_point(),
            script: vec![0x04, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04],
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TxOutput {
            value: 5_000_000_000,
            script: vec![
                0x41, 0x04, 0x96, 0xb5, 0x38, 0xe8, 0x53, 0x51, 0x9c, 0x72, 0x6a, 0x2c, 0x91,
                0xe6, 0x1e, 0xc1, 0x16, 0x00, 0xae, 0x13, 0x90, 0x81, 0x3a, 0x62, 0x7c, 0x66,
                0xfb, 0x8b, 0xe7, 0x94, 0x7b, 0xe6, 0x3c, 0x52, 0xda, 0x75, 0x89, 0x37, 0x95,
                0x15, 0xd4, 0xe0, 0xa6, 0x04, 0xf8, 0x14, 0x17, 0x81, 0xe6, 0x22, 0x94, 0x72,
                0x11, 0x66, 0xbf, 0x62, 0x1e, 0x73, 0xa8, 0x2c, 0xbf, 0x23, 0x42, 0xc8, 0x58,
                0xee, 0xac,
            ],
        }],
        lock_time: 0,
    };
    let expected_merkle: [u8; 32] = [
        0x98, 0x20, 0x51, 0xfd, 0x1e, 0x4b, 0xa7, 0x44, 0xbb, 0xbe, 0x68, 0x0e, 0x1f, 0xee,
        0x14, 0x67, 0x7b, 0xa1, 0xa3, 0xc3, 0x54, 0x0b, 0xf7, 0xb1, 0xcd, 0xb6, 0x06, 0xe8,
        0x57, 0x23, 0x3e, 0x0e,
    ];
    assert_eq!(tx_hash(&coinbase), expected_merkle);
    let header = BlockHeader {
        version: 1,
        prev_block_hash: GENESIS_HASH,
        merkle_root: expected_merkle,
        time: 1_231_469_665,
        target: MAX_TARGET,
        nonce: 2_573_394_689,
    };
    block_bytes(&Block {
        header,
        transactions: vec![coinbase],
    })
}

const NET_TIME: u64 = 1_349_643_202;

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn cold_start_materializes_genesis() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_real(&dir);
    assert_eq!(v.orphan_count(), 0);
    assert_eq!(v.branches().len(), 1);
    assert_eq!(v.main_branch(), 0);

    let b0 = &v.branches()[0];
    assert_eq!(b0.index.len(), 1);
    assert_eq!(b0.index.refs[0].file.file_id, 0);
    assert_eq!(b0.index.refs[0].file.file_pos, 0);
    assert_eq!(b0.index.refs[0].time, GENESIS_TIME);
    assert_eq!(b0.index.refs[0].target, MAX_TARGET);
    assert!(b0.index.contains(&GENESIS_HASH));
    assert_eq!(b0.work.to_bytes_be(), vec![0u8]);
    assert_eq!(b0.last_retarget_time, GENESIS_TIME);

    assert_eq!(b0.unspent.len(), 1);
    let entry = b0
        .unspent
        .get(&GENESIS_COINBASE_HASH, 0)
        .expect("genesis coinbase unspent")
        .clone();
    assert!(entry.coinbase);
    assert_eq!(entry.height, 0);
    assert_eq!(entry.branch, 0);
    assert_eq!(entry.file.file_pos, 209);

    let output = crate::validate::load_output(v.store_mut(), &entry).expect("read output");
    assert_eq!(output.value, 5_000_000_000);
    assert_eq!(output.script.len(), 67);

    v.verify_invariants().expect("invariants");
}

#[test]
fn warm_start_reloads_identical_state() {
    let dir = TempDir::new().expect("tempdir");
    let before = {
        let v = open_real(&dir);
        crate::persist::encode_branch(&v.branches()[0])
    };
    let v = open_real(&dir);
    assert_eq!(crate::persist::encode_branch(&v.branches()[0]), before);
    assert_eq!(v.branches()[0].prev_times, [GENESIS_TIME; 6]);
    assert_eq!(v.orphan_count(), 0);
    v.verify_invariants().expect("invariants");
}

#[test]
fn canonical_block_one_extends_main() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_real(&dir);
    let block = canonical_block_one();
    let status = v.process_block(&block, NET_TIME).expect("process");
    assert_eq!(status, BlockStatus::Main);

    let b0 = &v.branches()[0];
    assert_eq!(b0.index.len(), 2);
    assert_eq!(b0.last_validated_index, 2);
    // 2^256 / (max target + 1), low-order byte 2.
    assert_eq!(b0.work.to_bytes_be(), vec![0x01, 0x00, 0x01, 0x00, 0x02]);
    assert_eq!(b0.unspent.len(), 2);
    v.verify_invariants().expect("invariants");

    // Warm start reproduces the extended state too.
    let encoded = crate::persist::encode_branch(&v.branches()[0]);
    drop(v);
    let v = open_real(&dir);
    assert_eq!(crate::persist::encode_branch(&v.branches()[0]), encoded);
    v.verify_invariants().expect("invariants");
}

#[test]
fn duplicate_block_leaves_state_unchanged() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_real(&dir);
    let block = canonical_block_one();
    assert_eq!(
        v.process_block(&block, NET_TIME).expect("process"),
        BlockStatus::Main
    );
    let encoded = crate::persist::encode_branch(&v.branches()[0]);
    assert_eq!(
        v.process_block(&block, NET_TIME).expect("process"),
        BlockStatus::Duplicate
    );
    assert_eq!(crate::persist::encode_branch(&v.branches()[0]), encoded);
    assert_eq!(v.branches().len(), 1);
}

#[test]
fn orphan_pool_fills_then_refuses() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = GENESIS_TIME as u64 + 10_000;
    for seed in 0..MAX_ORPHANS as u64 {
        let block = make_block(
            [0xee; 32],
            GENESIS_TIME + 100 + seed as u32,
            MAX_TARGET,
            vec![make_coinbase(5_000_000_000, seed)],
        );
        assert_eq!(
            v.process_block(&block, net).expect("process"),
            BlockStatus::Orphan
        );
        assert_eq!(v.orphan_count(), seed as usize + 1);
    }
    let fourth = make_block(
        [0xee; 32],
        GENESIS_TIME + 500,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 99)],
    );
    assert_eq!(
        v.process_block(&fourth, net).expect("process"),
        BlockStatus::MaxCache
    );
    assert_eq!(v.orphan_count(), MAX_ORPHANS);

    // Orphans survive a restart through the validation file.
    drop(v);
    let v = open_easy(&dir);
    assert_eq!(v.orphan_count(), MAX_ORPHANS);
}

#[test]
fn time_drift_boundary() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = GENESIS_TIME as u64;
    let at_limit = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 7_200,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 1)],
    );
    assert_eq!(
        v.process_block(&at_limit, net).expect("process"),
        BlockStatus::Main
    );
    let past_limit = make_block(
        [0x11; 32],
        GENESIS_TIME + 7_201,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 2)],
    );
    assert_eq!(
        v.process_block(&past_limit, net).expect("process"),
        BlockStatus::BadTime
    );
}

#[test]
fn side_branch_then_reorganization() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = GENESIS_TIME as u64 + 100_000;

    // Main chain: genesis plus one block.
    let main_one = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 100,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 1)],
    );
    assert_eq!(
        v.process_block(&main_one, net).expect("process"),
        BlockStatus::Main
    );
    let main_one_coinbase = tx_hash(&make_coinbase(5_000_000_000, 1));

    // A forks from genesis, now an interior block: a side branch, main
    // unchanged, no transaction validation yet.
    let side_a_tx = make_coinbase(5_000_000_000, 2);
    let side_a = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 120,
        MAX_TARGET,
        vec![side_a_tx.clone()],
    );
    assert_eq!(
        v.process_block(&side_a, net).expect("process"),
        BlockStatus::Side
    );
    assert_eq!(v.branches().len(), 2);
    assert_eq!(v.main_branch(), 0);
    assert_eq!(v.branches()[1].last_validated_index, 0);
    assert!(v.branches()[1].unspent.is_empty());
    v.verify_invariants().expect("invariants");

    // B extends A: the side branch now outweighs the main chain, so the
    // deferred block gets validated and the branches swap.
    let side_a_hash = {
        let parsed = kestrel_consensus::parse_block_bytes(&side_a).expect("parse");
        kestrel_consensus::block_hash(&parsed.header)
    };
    let side_b_tx = make_coinbase(5_000_000_000, 3);
    let side_b = make_block(
        side_a_hash,
        GENESIS_TIME + 140,
        MAX_TARGET,
        vec![side_b_tx.clone()],
    );
    assert_eq!(
        v.process_block(&side_b, net).expect("process"),
        BlockStatus::Main
    );
    assert_eq!(v.main_branch(), 1);

    let winner = &v.branches()[1];
    assert_eq!(winner.index.len(), 2);
    assert_eq!(winner.last_validated_index, 2);
    // The displaced block's output is gone from the active view; the
    // genesis coinbase and both side-branch coinbases are in it.
    assert!(winner.unspent.get(&main_one_coinbase, 0).is_none());
    assert!(winner.unspent.get(&GENESIS_COINBASE_HASH, 0).is_some());
    assert!(winner.unspent.get(&tx_hash(&side_a_tx), 0).is_some());
    assert!(winner.unspent.get(&tx_hash(&side_b_tx), 0).is_some());
    // The displaced branch keeps its own view.
    assert!(v.branches()[0]
        .unspent
        .get(&main_one_coinbase, 0)
        .is_some());
    v.verify_invariants().expect("invariants");

    // Reload and make sure the reorganized state persisted.
    drop(v);
    let v = open_easy(&dir);
    assert_eq!(v.main_branch(), 1);
    assert_eq!(v.branches().len(), 2);
    assert_eq!(v.branches()[1].last_validated_index, 2);
    v.verify_invariants().expect("invariants");
}

#[test]
fn deferred_side_branch_validation_catches_bad_spend() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = GENESIS_TIME as u64 + 100_000;

    let main_one = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 100,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 1)],
    );
    assert_eq!(
        v.process_block(&main_one, net).expect("process"),
        BlockStatus::Main
    );

    // A side block spending an output that does not exist. Structure is
    // fine, so it is recorded without validation.
    let bogus_spend = Tx {
        version: 1,
        inputs: vec![TxInput {
            prev_out: OutPoint {
                tx_hash: [0x77; 32],
                index: 0,
            },
            script: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TxOutput {
            value: 1,
            script: vec![0x51],
        }],
        lock_time: 0,
    };
    let side_a = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 120,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 2), bogus_spend],
    );
    assert_eq!(
        v.process_block(&side_a, net).expect("process"),
        BlockStatus::Side
    );

    // Trying to reorganize onto it forces the deferred validation, which
    // finds the missing output. The main chain stays put.
    let side_a_hash = {
        let parsed = kestrel_consensus::parse_block_bytes(&side_a).expect("parse");
        kestrel_consensus::block_hash(&parsed.header)
    };
    let side_b = make_block(
        side_a_hash,
        GENESIS_TIME + 140,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 3)],
    );
    assert_eq!(
        v.process_block(&side_b, net).expect("process"),
        BlockStatus::Bad
    );
    assert_eq!(v.main_branch(), 0);
    assert_eq!(v.branches()[1].index.len(), 1);
    assert_eq!(v.branches()[1].last_validated_index, 0);
    v.verify_invariants().expect("invariants");
}

#[test]
fn branch_cache_fills_then_refuses() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = GENESIS_TIME as u64 + 100_000;

    // Two main-chain blocks so genesis is interior and side branches stay
    // lighter than the main chain.
    let main_one = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 100,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 1)],
    );
    assert_eq!(
        v.process_block(&main_one, net).expect("process"),
        BlockStatus::Main
    );
    let main_one_hash = {
        let parsed = kestrel_consensus::parse_block_bytes(&main_one).expect("parse");
        kestrel_consensus::block_hash(&parsed.header)
    };
    let main_two = make_block(
        main_one_hash,
        GENESIS_TIME + 200,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 2)],
    );
    assert_eq!(
        v.process_block(&main_two, net).expect("process"),
        BlockStatus::Main
    );

    // Three distinct forks off genesis occupy the remaining branch slots.
    for seed in 0..(MAX_BRANCHES - 1) as u64 {
        let side = make_block(
            GENESIS_HASH,
            GENESIS_TIME + 300 + seed as u32,
            MAX_TARGET,
            vec![make_coinbase(5_000_000_000, 100 + seed)],
        );
        assert_eq!(
            v.process_block(&side, net).expect("process"),
            BlockStatus::Side
        );
    }
    assert_eq!(v.branches().len(), MAX_BRANCHES);

    // A fifth distinct branch is refused.
    let overflow = make_block(
        GENESIS_HASH,
        GENESIS_TIME + 900,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 999)],
    );
    assert_eq!(
        v.process_block(&overflow, net).expect("process"),
        BlockStatus::MaxCache
    );
    assert_eq!(v.branches().len(), MAX_BRANCHES);
    v.verify_invariants().expect("invariants");
}

#[test]
fn retarget_window_boundary_requires_recomputed_target() {
    let dir = TempDir::new().expect("tempdir");
    let mut v = open_easy(&dir);
    let net = u32::MAX as u64;
    let spacing = 300u32;

    // Fill the first difficulty window at twice the expected cadence.
    let mut prev = GENESIS_HASH;
    for height in 1..RETARGET_INTERVAL {
        let block = make_block(
            prev,
            GENESIS_TIME + height * spacing,
            MAX_TARGET,
            vec![make_coinbase(5_000_000_000, height as u64)],
        );
        assert_eq!(
            v.process_block(&block, net).expect("process"),
            BlockStatus::Main,
            "height {height}"
        );
        let parsed = kestrel_consensus::parse_block_bytes(&block).expect("parse");
        prev = kestrel_consensus::block_hash(&parsed.header);
    }

    let boundary_time = GENESIS_TIME + RETARGET_INTERVAL * spacing;
    let expected = retarget(MAX_TARGET, boundary_time - GENESIS_TIME);
    assert_ne!(expected, MAX_TARGET);

    // The old target is refused at the window boundary.
    let stale = make_block(
        prev,
        boundary_time,
        MAX_TARGET,
        vec![make_coinbase(5_000_000_000, 5000)],
    );
    assert_eq!(
        v.process_block(&stale, net).expect("process"),
        BlockStatus::Bad
    );

    // The recomputed target is accepted, and the retarget timestamp moves.
    let fresh = make_block(
        prev,
        boundary_time,
        expected,
        vec![make_coinbase(5_000_000_000, 5001)],
    );
    assert_eq!(
        v.process_block(&fresh, net).expect("process"),
        BlockStatus::Main
    );
    assert_eq!(v.branches()[0].last_retarget_time, boundary_time);

    // The next block continues on the new difficulty.
    let parsed = kestrel_consensus::parse_block_bytes(&fresh).expect("parse");
    let after = make_block(
        kestrel_consensus::block_hash(&parsed.header),
        boundary_time + spacing,
        expected,
        vec![make_coinbase(5_000_000_000, 5002)],
    );
    assert_eq!(
        v.process_block(&after, net).expect("process"),
        BlockStatus::Main
    );
    v.verify_invariants().expect("invariants");
}
