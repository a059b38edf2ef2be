// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Retrying execution of units of work
//!
//! # State machine
//!
//! ```text
//! Idle ──► AttemptRunning ──► Success
//!               │  ▲
//!               │  └──── Retrying (backoff sleep)
//!               ▼
//!             Failed   (non-retriable, cancelled, or budget spent)
//! ```

pub mod coordinator;
pub mod policy;

pub use coordinator::{
    tx_work, work, FnTxWork, FnWork, RetryCoordinator, TxUnitOfWork, UnitOfWork, WorkFuture,
};
pub use policy::{Backoff, Classifier, RetryPolicy};
