// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Command definitions for the querykit CLI

use clap::{Parser, Subcommand, ValueEnum};
use querykit::{ClientConfig, Result};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "querykit")]
#[command(about = "Retryable transactional execution, shown on small programs")]
#[command(version)]
pub struct Cli {
    /// Store address (overrides config file and QUERYKIT_TARGET)
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Path to a JSON client configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk through the issue tracker: schema, inserts, lookups and links
    Issues,

    /// Increment one counter from overlapping transactions
    LongTransaction {
        /// Number of workers
        #[arg(long, default_value_t = 10)]
        workers: usize,

        /// Milliseconds between worker starts
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Milliseconds each transaction stays open
        #[arg(long, default_value_t = 2000)]
        hold_ms: u64,
    },

    /// Aggregate a whole table while other workers upsert single rows
    WholeTableLocks {
        /// Rows in the table
        #[arg(long, default_value_t = 10_000)]
        rows: usize,

        /// Aggregates to run, one after another
        #[arg(long, default_value_t = 3)]
        scans: usize,

        /// Number of single-row writers
        #[arg(long, default_value_t = 4)]
        writers: usize,

        /// Writes per writer
        #[arg(long, default_value_t = 20)]
        writes: usize,

        /// Milliseconds between writes of one writer
        #[arg(long, default_value_t = 100)]
        write_interval_ms: u64,

        /// Milliseconds each scan keeps its transaction open
        #[arg(long, default_value_t = 500)]
        hold_ms: u64,
    },

    /// Print the resolved client configuration
    Config,

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

impl Cli {
    /// Config file (or defaults), then environment, then `--target`
    pub fn client_config(&self) -> Result<ClientConfig> {
        let config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        let mut config = config.with_env_overrides()?;
        if let Some(target) = &self.target {
            config.target = target.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
