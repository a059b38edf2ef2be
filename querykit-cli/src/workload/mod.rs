// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Contention demos
//!
//! Both programs make serializable transactions lose at commit time and let
//! the retry coordinator run them again:
//!
//! - [`long_transaction`]: overlapping read-modify-write of one counter row
//! - [`table_locks`]: a full-table aggregate racing single-row writers

pub mod long_transaction;
pub mod table_locks;

pub use long_transaction::{ContentionConfig, ContentionReport};
pub use table_locks::{TableLocksConfig, TableLocksReport};

use querykit::Result;

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Committed,
    /// Lost to a concurrent writer at commit
    Conflict,
    Failed,
}

impl AttemptOutcome {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => AttemptOutcome::Committed,
            Err(err) if err.is_conflict() => AttemptOutcome::Conflict,
            Err(_) => AttemptOutcome::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Committed => "OK",
            AttemptOutcome::Conflict => "TLI",
            AttemptOutcome::Failed => "err",
        }
    }
}
