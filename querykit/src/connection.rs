// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Session capability: connections and sessions
//!
//! These traits are the boundary to the store. querykit consumes them; a
//! store client (or the in-memory store under the `memory` feature)
//! implements them. A [`Connection`] hands out independent [`Session`]s and
//! the retry coordinator takes a fresh one for every attempt.

use crate::context::Context;
use crate::error::Result;
use crate::result::ResultStream;
use crate::transaction::{Transaction, TxControl, TxSettings};
use crate::value::Params;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens connections to a store
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one logical connection to `target`
    ///
    /// Failures are [`crate::Error::Connection`] and are never retried.
    async fn open(&self, ctx: &Context, target: &str) -> Result<Arc<dyn Connection>>;
}

/// One logical connection to a store
#[async_trait]
pub trait Connection: Send + Sync {
    /// Target this connection was opened for
    fn target(&self) -> &str;

    /// Acquire a new session
    async fn session(&self, ctx: &Context) -> Result<Box<dyn Session>>;

    /// Close the connection; later session requests fail
    async fn close(&self, ctx: &Context) -> Result<()>;
}

/// A session on a connection
///
/// Statements carry their own [`TxControl`]. For interactive transactions use
/// [`Session::begin`].
#[async_trait]
pub trait Session: Send {
    /// Store-assigned session identifier
    fn id(&self) -> &str;

    async fn exec(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
        tx: TxControl,
    ) -> Result<()>;

    /// Run a statement and return its lazy, single-pass result stream
    async fn query(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
        tx: TxControl,
    ) -> Result<Box<dyn ResultStream>>;

    async fn begin(&mut self, ctx: &Context, settings: TxSettings) -> Result<Box<dyn Transaction>>;
}
