// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! querykit CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
mod repository;
mod workload;

use cli::{Cli, Commands};
use std::time::Duration;
use workload::TableLocksConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // RUST_LOG can still override
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Commands::Version = cli.command {
        println!("{} {}", "querykit".bold().green(), querykit::VERSION);
        println!("Retryable transactional execution");
        return Ok(());
    }

    let config = cli.client_config()?;

    match cli.command {
        Commands::Issues => cli::handle_issues(config).await,

        Commands::LongTransaction {
            workers,
            interval_ms,
            hold_ms,
        } => cli::handle_long_transaction(config, workers, interval_ms, hold_ms).await,

        Commands::WholeTableLocks {
            rows,
            scans,
            writers,
            writes,
            write_interval_ms,
            hold_ms,
        } => {
            let locks = TableLocksConfig {
                rows,
                scans,
                writers,
                writes_per_writer: writes,
                write_interval: Duration::from_millis(write_interval_ms),
                scan_hold: Duration::from_millis(hold_ms),
            };
            cli::handle_whole_table_locks(config, locks).await
        }

        Commands::Config => cli::handle_config(config),

        Commands::Version => Ok(()),
    }
}
