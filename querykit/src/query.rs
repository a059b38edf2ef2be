// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Query facade
//!
//! [`QueryHelper`] is what repositories talk to. Each call is one logical
//! operation: it runs through the retry coordinator, gets a fresh session per
//! attempt, and returns either every row of one successful attempt or one
//! error.

use crate::config::RetryConfig;
use crate::connection::{Connection, Session};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::result::{materialize, ResultBuffer};
use crate::retry::{RetryCoordinator, RetryPolicy, TxUnitOfWork, UnitOfWork};
use crate::transaction::{TxControl, TxSettings};
use crate::value::{Params, Row};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Entry point for running statements with retries
///
/// Cloning is cheap; clones share the coordinator.
///
/// # Examples
///
/// ```ignore
/// let helper = QueryHelper::new(connection, RetryPolicy::default());
/// helper.execute(&ctx, "DROP TABLE IF EXISTS issues", &Params::new()).await?;
///
/// let issues: Vec<Issue> = helper
///     .idempotent(true)
///     .query_as(&ctx, "SELECT id, title FROM issues", TxControl::snapshot_ro(), &Params::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryHelper {
    coordinator: Arc<RetryCoordinator>,
    policy: RetryPolicy,
}

impl QueryHelper {
    pub fn new(connection: Arc<dyn Connection>, policy: RetryPolicy) -> Self {
        Self {
            coordinator: Arc::new(RetryCoordinator::new(connection)),
            policy,
        }
    }

    pub fn from_config(connection: Arc<dyn Connection>, config: &RetryConfig) -> Self {
        Self::new(connection, RetryPolicy::from(config))
    }

    pub fn with_coordinator(coordinator: Arc<RetryCoordinator>, policy: RetryPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    /// A helper sharing this coordinator with a different policy
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            policy,
        }
    }

    /// A helper that declares its operations safe (or unsafe) to repeat
    pub fn idempotent(&self, idempotent: bool) -> Self {
        self.with_policy(self.policy.clone().idempotent(idempotent))
    }

    /// Run a statement outside any transaction (DDL, fire-and-forget writes)
    ///
    /// Follows this helper's policy; the default policy is not idempotent, so
    /// conflicts are only retried after `idempotent(true)`.
    pub async fn execute(&self, ctx: &Context, statement: &str, params: &Params) -> Result<()> {
        self.execute_with(ctx, statement, params, &self.policy).await
    }

    /// Like [`QueryHelper::execute`] with an explicit policy
    pub async fn execute_with(
        &self,
        ctx: &Context,
        statement: &str,
        params: &Params,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let unit = ExecStatement {
            statement,
            params,
            tx: TxControl::no_tx(),
        };
        self.coordinator.execute(ctx, &unit, policy).await?;
        Ok(())
    }

    /// Run one statement under explicit transaction control
    pub async fn execute_tx(
        &self,
        ctx: &Context,
        statement: &str,
        tx: TxControl,
        params: &Params,
    ) -> Result<()> {
        let unit = ExecStatement {
            statement,
            params,
            tx,
        };
        self.coordinator.execute(ctx, &unit, &self.policy).await?;
        Ok(())
    }

    /// Run a statement and map every returned row through `handler`
    ///
    /// A failure anywhere in the stream throws away what was read and runs the
    /// statement again from the start, in a new session and snapshot.
    pub async fn query<R, F>(
        &self,
        ctx: &Context,
        statement: &str,
        tx: TxControl,
        params: &Params,
        handler: F,
    ) -> Result<Vec<R>>
    where
        R: Send + 'static,
        F: Fn(&Row) -> Result<R> + Send + Sync,
    {
        let unit = QueryStatement {
            statement,
            params,
            tx,
            handler: &handler,
        };
        self.coordinator.execute(ctx, &unit, &self.policy).await
    }

    /// Run a statement and decode every row with serde
    pub async fn query_as<T>(
        &self,
        ctx: &Context,
        statement: &str,
        tx: TxControl,
        params: &Params,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.query(ctx, statement, tx, params, |row: &Row| row.deserialize::<T>())
            .await
    }

    /// Run a statement that must return exactly one row
    pub async fn query_single<R, F>(
        &self,
        ctx: &Context,
        statement: &str,
        tx: TxControl,
        params: &Params,
        handler: F,
    ) -> Result<R>
    where
        R: Send + 'static,
        F: Fn(&Row) -> Result<R> + Send + Sync,
    {
        let rows = self.query(ctx, statement, tx, params, handler).await?;
        expect_single(rows)
    }

    /// Run a multi-statement unit of work on a session
    pub async fn run<R, W>(&self, ctx: &Context, work: &W) -> Result<Vec<R>>
    where
        R: Send + 'static,
        W: UnitOfWork<R> + ?Sized,
    {
        self.coordinator.execute(ctx, work, &self.policy).await
    }

    /// Run a unit of work inside a transaction committed by the coordinator
    pub async fn run_tx<R, W>(&self, ctx: &Context, settings: TxSettings, work: &W) -> Result<Vec<R>>
    where
        R: Send + 'static,
        W: TxUnitOfWork<R> + ?Sized,
    {
        self.coordinator
            .execute_tx(ctx, settings, work, &self.policy)
            .await
    }
}

/// Require exactly one materialized row
///
/// Zero rows is [`Error::NotFound`], more than one is
/// [`Error::MultipleMatches`]. These are post-conditions on a finished
/// result and are never retried.
pub fn expect_single<R>(rows: Vec<R>) -> Result<R> {
    let count = rows.len();
    let mut rows = rows.into_iter();
    match (rows.next(), count) {
        (None, _) => Err(Error::NotFound("query returned no rows".to_string())),
        (Some(row), 1) => Ok(row),
        (Some(_), count) => Err(Error::MultipleMatches { count }),
    }
}

struct ExecStatement<'a> {
    statement: &'a str,
    params: &'a Params,
    tx: TxControl,
}

#[async_trait]
impl<'a> UnitOfWork<()> for ExecStatement<'a> {
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        _rows: &mut ResultBuffer<()>,
    ) -> Result<()> {
        session
            .exec(ctx, self.statement, self.params, self.tx)
            .await
    }
}

struct QueryStatement<'a, F: ?Sized> {
    statement: &'a str,
    params: &'a Params,
    tx: TxControl,
    handler: &'a F,
}

#[async_trait]
impl<'a, R, F> UnitOfWork<R> for QueryStatement<'a, F>
where
    R: Send + 'static,
    F: Fn(&Row) -> Result<R> + Send + Sync + ?Sized,
{
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()> {
        let mut stream = session
            .query(ctx, self.statement, self.params, self.tx)
            .await?;
        let handled = materialize(ctx, stream.as_mut(), rows, self.handler).await?;
        log::trace!(
            "attempt {} materialized {} rows ({})",
            rows.attempt(),
            handled,
            self.tx.mode
        );
        Ok(())
    }
}
