// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for querykit
//!
//! Runs the tutorial programs against a store: the issue tracker walkthrough
//! and the two contention demos.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{
    handle_config, handle_issues, handle_long_transaction, handle_whole_table_locks,
};
