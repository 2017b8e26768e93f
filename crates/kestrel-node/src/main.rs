//! kestrel-node: a thin entry wrapper around the chain validator.
//!
//! Peer networking is out of scope here; blocks arrive through a
//! `NetworkGateway`, and the bundled gateway replays a file of
//! length-prefixed blocks. Signature verification uses the development
//! backend, which rejects every signature, so imported chains must not
//! depend on signature-bearing spends until a real backend is wired in.

mod config;
mod gateway;

use std::path::Path;
use std::process::ExitCode;

use kestrel_chain::{log_sink, BlockStatus, Validator};
use kestrel_consensus::Mainnet;
use kestrel_crypto::DevStdVerifier;

use crate::config::NodeConfig;
use crate::gateway::{FileGateway, NetworkGateway};

fn open_validator(data_dir: &str) -> Result<Validator, String> {
    Validator::open(
        Path::new(data_dir),
        Box::new(Mainnet),
        Box::new(DevStdVerifier),
        log_sink(),
    )
    .map_err(|e| format!("open validator: {e}"))
}

fn cmd_init(data_dir: &str, config_path: &str) -> Result<(), String> {
    let validator = open_validator(data_dir)?;
    let config = NodeConfig::new(data_dir);
    config.save(Path::new(config_path))?;
    println!(
        "initialized: {} branches, main height {}",
        validator.branches().len(),
        validator.branches()[validator.main_branch() as usize]
            .next_height()
            .saturating_sub(1)
    );
    Ok(())
}

fn cmd_import(config_path: &str) -> Result<(), String> {
    let config = NodeConfig::load(Path::new(config_path))?;
    let blocks_file = config
        .blocks_file
        .as_deref()
        .ok_or_else(|| "config has no blocks_file".to_string())?;
    let mut validator = open_validator(&config.data_dir)?;
    let mut gw = FileGateway::open(blocks_file, config.network_time_offset)?;

    let mut counts = [0usize; 8];
    while let Some(bytes) = gw.next_block()? {
        match validator.process_block(&bytes, gw.network_time()) {
            Ok(status) => {
                counts[status as usize] += 1;
                log::info!("block {}", status.as_str());
            }
            Err(e) => {
                // Environment fault, not a peer fault: stop rather than
                // misclassify blocks against broken state.
                counts[7] += 1;
                eprintln!("ERROR: {e}");
                break;
            }
        }
    }

    for (status, label) in [
        (BlockStatus::Main, "MAIN"),
        (BlockStatus::Side, "SIDE"),
        (BlockStatus::Orphan, "ORPHAN"),
        (BlockStatus::Duplicate, "DUPLICATE"),
        (BlockStatus::Bad, "BAD"),
        (BlockStatus::BadTime, "BAD_TIME"),
        (BlockStatus::MaxCache, "MAX_CACHE"),
    ] {
        println!("{label}: {}", counts[status as usize]);
    }
    println!("ERROR: {}", counts[7]);
    Ok(())
}

fn cmd_status(data_dir: &str) -> Result<(), String> {
    let validator = open_validator(data_dir)?;
    println!("main branch: {}", validator.main_branch());
    println!("orphans: {}", validator.orphan_count());
    for (id, branch) in validator.branches().iter().enumerate() {
        let tip = branch
            .tip()
            .map(|r| hex::encode(r.hash))
            .unwrap_or_else(|| "(empty)".into());
        println!(
            "branch {id}: height {} ({} refs, {} validated, {} unspent) tip {tip}",
            branch.next_height().saturating_sub(1),
            branch.index.len(),
            branch.last_validated_index,
            branch.unspent.len(),
        );
    }
    Ok(())
}

fn usage() {
    eprintln!("usage: kestrel-node <command> [args]");
    eprintln!("commands:");
    eprintln!("  init <data-dir> <config-path>");
    eprintln!("  import <config-path>");
    eprintln!("  status <data-dir>");
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("init") => match (args.get(2), args.get(3)) {
            (Some(data_dir), Some(config_path)) => cmd_init(data_dir, config_path),
            _ => {
                usage();
                return ExitCode::FAILURE;
            }
        },
        Some("import") => match args.get(2) {
            Some(config_path) => cmd_import(config_path),
            None => {
                usage();
                return ExitCode::FAILURE;
            }
        },
        Some("status") => match args.get(2) {
            Some(data_dir) => cmd_status(data_dir),
            None => {
                usage();
                return ExitCode::FAILURE;
            }
        },
        _ => {
            usage();
            return ExitCode::FAILURE;
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
