// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction control policy and explicit transactions
//!
//! [`TxControl`] is a plain value chosen at each call site and handed to the
//! store unchanged; querykit never inspects statement text to pick a mode.
//! [`Transaction`] is the handle for explicitly begun (interactive)
//! transactions. Dropping a handle that was neither committed nor rolled back
//! rolls it back.

use crate::context::Context;
use crate::error::Result;
use crate::result::ResultStream;
use crate::value::Params;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Isolation behavior of a statement or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxMode {
    /// Conflict detection at commit time; required for any write
    SerializableReadWrite,
    /// Consistent point-in-time view, no write locks, no writes
    SnapshotReadOnly,
    /// No transaction; for DDL and fire-and-forget statements
    None,
}

impl TxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxMode::SerializableReadWrite => "SERIALIZABLE_RW",
            TxMode::SnapshotReadOnly => "SNAPSHOT_RO",
            TxMode::None => "NO_TX",
        }
    }

    pub fn allows_writes(&self) -> bool {
        !matches!(self, TxMode::SnapshotReadOnly)
    }
}

impl std::fmt::Display for TxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction control for a single statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxControl {
    pub mode: TxMode,
    pub commit: bool,
}

impl TxControl {
    /// Serializable read-write, committed together with the statement
    pub const fn serializable_rw() -> Self {
        Self {
            mode: TxMode::SerializableReadWrite,
            commit: true,
        }
    }

    /// Snapshot read-only
    pub const fn snapshot_ro() -> Self {
        Self {
            mode: TxMode::SnapshotReadOnly,
            commit: true,
        }
    }

    /// No transaction at all
    pub const fn no_tx() -> Self {
        Self {
            mode: TxMode::None,
            commit: false,
        }
    }

    pub const fn with_commit(self, commit: bool) -> Self {
        Self {
            mode: self.mode,
            commit,
        }
    }
}

impl Default for TxControl {
    fn default() -> Self {
        Self::serializable_rw()
    }
}

/// Settings for an explicitly begun transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSettings {
    pub mode: TxMode,
}

impl TxSettings {
    pub const fn serializable_rw() -> Self {
        Self {
            mode: TxMode::SerializableReadWrite,
        }
    }

    pub const fn snapshot_ro() -> Self {
        Self {
            mode: TxMode::SnapshotReadOnly,
        }
    }
}

impl Default for TxSettings {
    fn default() -> Self {
        Self::serializable_rw()
    }
}

/// An explicitly begun transaction on one session
///
/// Statements run inside the transaction's snapshot. `exec_commit` runs the
/// last statement and commits in one round trip. After `commit` or
/// `rollback` every further call fails.
#[async_trait]
pub trait Transaction: Send {
    /// Store-assigned transaction identifier
    fn id(&self) -> &str;

    fn settings(&self) -> TxSettings;

    async fn exec(&mut self, ctx: &Context, statement: &str, params: &Params) -> Result<()>;

    async fn exec_commit(&mut self, ctx: &Context, statement: &str, params: &Params) -> Result<()>;

    async fn query(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
    ) -> Result<Box<dyn ResultStream>>;

    async fn commit(&mut self, ctx: &Context) -> Result<()>;

    async fn rollback(&mut self, ctx: &Context) -> Result<()>;

    /// Whether the transaction was committed or rolled back
    fn is_finished(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_control_constructors() {
        let rw = TxControl::serializable_rw();
        assert_eq!(rw.mode, TxMode::SerializableReadWrite);
        assert!(rw.commit);

        let ro = TxControl::snapshot_ro();
        assert_eq!(ro.mode, TxMode::SnapshotReadOnly);
        assert!(!ro.mode.allows_writes());

        let none = TxControl::no_tx();
        assert_eq!(none.mode, TxMode::None);
        assert!(!none.commit);

        assert!(!rw.with_commit(false).commit);
    }

    #[test]
    fn test_tx_mode_display() {
        assert_eq!(TxMode::SerializableReadWrite.to_string(), "SERIALIZABLE_RW");
        assert_eq!(TxMode::SnapshotReadOnly.to_string(), "SNAPSHOT_RO");
        assert_eq!(TxMode::None.to_string(), "NO_TX");
    }
}
