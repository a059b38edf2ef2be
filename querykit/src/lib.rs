// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! querykit - retryable transactional execution over a session-oriented store
//!
//! Every call into the store is one logical operation that may take several
//! attempts. Each attempt runs on a fresh session, materializes its rows into
//! its own buffer, and is either handed back whole or thrown away. Errors are
//! classified as transient, conflict, non-retriable or cancelled; conflicts
//! are only retried for work declared idempotent.
//!
//! # Quick Start
//!
//! ```ignore
//! use querykit::{Context, MemoryStore, Params, QueryHelper, RetryPolicy, TxControl};
//!
//! let store = MemoryStore::new("local");
//! let helper = QueryHelper::new(store.connect(), RetryPolicy::default());
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(5));
//!
//! helper.execute(&ctx, "CREATE TABLE issues", &Params::new()).await?;
//! let titles = helper
//!     .idempotent(true)
//!     .query(&ctx, "SELECT * FROM issues", TxControl::snapshot_ro(), &Params::new(), |row| {
//!         Ok(row.get_text("title")?.to_string())
//!     })
//!     .await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Repositories / application code       │
//! └─────────────────────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  QueryHelper (query facade)             │
//! │  RetryCoordinator + RetryPolicy         │
//! │  ResultBuffer (one per attempt)         │
//! └─────────────────────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  Session capability                     │
//! │  Connection / Session / Transaction     │
//! │  (MemoryStore or a real store client)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`context`] - Cancellation and deadlines
//! - [`error`] - Error taxonomy and classification
//! - [`retry`] - Retry coordinator and policy
//! - [`query`] - Query facade
//! - [`result`] - Result streams and materialization
//! - [`transaction`] - Transaction control
//! - [`connection`] - Session capability traits
//! - [`config`] - Client configuration
//! - [`memory`] - In-memory store

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
pub mod query;
pub mod result;
pub mod retry;
pub mod transaction;
pub mod value;

pub use config::{BackoffConfig, ClientConfig, RetryConfig};
pub use connection::{Connection, Connector, Session};
pub use context::Context;
pub use error::{Error, ErrorClassification, Result};
#[cfg(feature = "memory")]
pub use memory::{FaultPoint, Key, MemoryConfig, MemoryStore, StoreStats, TxView};
pub use query::{expect_single, QueryHelper};
pub use result::{
    materialize, read_all, Production, ResultBuffer, ResultSet, ResultSetPart, ResultStream,
};
pub use retry::{
    tx_work, work, Backoff, Classifier, RetryCoordinator, RetryPolicy, TxUnitOfWork, UnitOfWork,
    WorkFuture,
};
pub use transaction::{Transaction, TxControl, TxMode, TxSettings};
pub use value::{Params, Row, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
