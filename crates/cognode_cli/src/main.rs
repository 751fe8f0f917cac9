//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `cognode_core` linkage.
//! - When given a data directory (first argument or `COGNODE_DATA_DIR`),
//!   run a read-only integrity and consistency scan and print the counts.

use cognode_core::{
    init_logging, EngineConfig, FileNodeStore, GraphManager, NodeStore, StoreConfig,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("cognode_core ping={}", cognode_core::ping());
    println!("cognode_core version={}", cognode_core::core_version());

    let mut config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = std::env::args().nth(1) {
        config.store = Some(StoreConfig::new(dir));
    }
    if let Some(logging) = &config.logging {
        if let Err(err) = init_logging(logging) {
            eprintln!("logging error: {err}");
            return ExitCode::FAILURE;
        }
    }

    let Some(store_config) = config.store else {
        return ExitCode::SUCCESS;
    };
    match scan(store_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_scan module=cli status=error error={err}");
            eprintln!("scan failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn scan(store_config: StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FileNodeStore::open(store_config)?);
    let integrity = store.check_integrity(false)?;
    println!(
        "integrity checked={} corrupted={} repaired={}",
        integrity.checked, integrity.corrupted, integrity.repaired
    );

    let manager = GraphManager::with_store(store);
    let report = manager.check_consistency(false)?;
    println!(
        "consistency checked={} inconsistencies={} repaired={}",
        report.checked, report.inconsistencies, report.repaired
    );
    for issue in &report.issues {
        println!("issue code={} detail={issue:?}", issue.code());
    }
    Ok(())
}
