// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory store
//!
//! A self-contained implementation of the session capability: multi-version
//! tables, snapshot reads, first-committer-wins serializable commits, result
//! streams delivered in parts, and one-shot fault injection. Used by the
//! test suite and the tutorial CLI.

pub mod fault;
pub mod session;
pub mod store;

pub use fault::FaultPoint;
pub use session::{MemoryConnection, MemoryResultStream, MemorySession, MemoryTransaction};
pub use store::{Key, MemoryStore, Routine, StoreStats, TxView};

use serde::{Deserialize, Serialize};

/// Tuning for [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum rows per streamed result-set part
    pub part_rows: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { part_rows: 100 }
    }
}
