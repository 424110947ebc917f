//! utxoindex CLI: inspect defaults and validate ingestion configs.
//!
//! Usage:
//! ```bash
//! utxoindex info
//! utxoindex config                 # print the default config as JSON
//! utxoindex config ingest.json     # load, validate and print a config
//! utxoindex version
//! ```

use std::env;
use std::fs;
use std::process;

use anyhow::Context;
use utxoindex_core::IngestConfig;
use utxoindex_observability::{init_tracing, LogConfig};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    init_tracing(&LogConfig::default().component("utxoindex-cli", "debug"))?;

    match args[1].as_str() {
        "info" => cmd_info(),
        "config" => cmd_config(args.get(2).map(String::as_str))?,
        "version" | "--version" | "-V" => {
            println!("utxoindex {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
    Ok(())
}

fn print_usage() {
    println!("utxoindex {}", env!("CARGO_PKG_VERSION"));
    println!("Multi-coin UTXO ingestion engine\n");
    println!("USAGE:");
    println!("    utxoindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info           Show engine defaults");
    println!("    config [FILE]  Print the default config, or validate FILE");
    println!("    version        Print version");
    println!("    help           Print this help");
}

fn cmd_info() {
    let defaults = IngestConfig::default();
    println!("UtxoIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Pipelines: history, backfill, follower");
    println!("  Default workers per batch: {}", defaults.worker_count);
    println!("  Default random height limit: {}", defaults.random_height_limit);
    println!(
        "  Block batcher: {} rows, every {} ms, {} flushes/s",
        defaults.block_batcher_capacity,
        defaults.block_batcher_flush_interval_ms,
        defaults.block_batcher_rps
    );
    println!("  Storage backends: memory");
    println!("  Chains: Bitcoin-family (btc, ltc, doge, ...)");
}

fn cmd_config(path: Option<&str>) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            let config = IngestConfig::from_json(&raw).with_context(|| format!("load {path}"))?;
            tracing::debug!(path, coin = %config.coin, network = %config.network, "config valid");
            config
        }
        None => IngestConfig::default(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
