// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Retry coordinator
//!
//! Runs a unit of work against a fresh session until it succeeds, fails with
//! an error that must not be retried, runs out of attempts or time, or the
//! context is done. Attempts are strictly sequential. Each attempt gets its
//! own session (and transaction, for [`RetryCoordinator::execute_tx`]) and
//! its own [`ResultBuffer`]; the buffer of a failed attempt is dropped with
//! the attempt.

use crate::connection::{Connection, Session};
use crate::context::Context;
use crate::error::{Error, ErrorClassification, Result};
use crate::result::ResultBuffer;
use crate::retry::policy::RetryPolicy;
use crate::transaction::{Transaction, TxSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Boxed future returned by closure-based units of work
pub type WorkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Caller logic executed, possibly several times, against a session
///
/// Rows meant for the caller go into `rows`. Anything else the work does
/// outside the store must be safe to repeat.
#[async_trait]
pub trait UnitOfWork<R>: Send + Sync
where
    R: Send + 'static,
{
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()>;
}

/// Caller logic executed inside a transaction the coordinator manages
///
/// The coordinator begins the transaction before calling `run` and commits it
/// afterwards unless the work already finished it (for example with
/// [`Transaction::exec_commit`]). On error the transaction is rolled back.
#[async_trait]
pub trait TxUnitOfWork<R>: Send + Sync
where
    R: Send + 'static,
{
    async fn run(
        &self,
        ctx: &Context,
        tx: &mut dyn Transaction,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()>;
}

/// Closure adapter for [`UnitOfWork`], see [`work`]
pub struct FnWork<F>(F);

/// Closure adapter for [`TxUnitOfWork`], see [`tx_work`]
pub struct FnTxWork<F>(F);

/// Turn a closure into a unit of work
///
/// ```ignore
/// let unit = work(|ctx, session, rows| Box::pin(async move {
///     session.exec(ctx, "DELETE FROM t", &Params::new(), TxControl::serializable_rw()).await?;
///     rows.append(());
///     Ok(())
/// }));
/// ```
pub fn work<R, F>(f: F) -> FnWork<F>
where
    R: Send + 'static,
    F: for<'a> Fn(&'a Context, &'a mut dyn Session, &'a mut ResultBuffer<R>) -> WorkFuture<'a>
        + Send
        + Sync,
{
    FnWork(f)
}

/// Turn a closure into a transactional unit of work
pub fn tx_work<R, F>(f: F) -> FnTxWork<F>
where
    R: Send + 'static,
    F: for<'a> Fn(&'a Context, &'a mut dyn Transaction, &'a mut ResultBuffer<R>) -> WorkFuture<'a>
        + Send
        + Sync,
{
    FnTxWork(f)
}

#[async_trait]
impl<R, F> UnitOfWork<R> for FnWork<F>
where
    R: Send + 'static,
    F: for<'a> Fn(&'a Context, &'a mut dyn Session, &'a mut ResultBuffer<R>) -> WorkFuture<'a>
        + Send
        + Sync,
{
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()> {
        (self.0)(ctx, session, rows).await
    }
}

#[async_trait]
impl<R, F> TxUnitOfWork<R> for FnTxWork<F>
where
    R: Send + 'static,
    F: for<'a> Fn(&'a Context, &'a mut dyn Transaction, &'a mut ResultBuffer<R>) -> WorkFuture<'a>
        + Send
        + Sync,
{
    async fn run(
        &self,
        ctx: &Context,
        tx: &mut dyn Transaction,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()> {
        (self.0)(ctx, tx, rows).await
    }
}

/// Begins, commits and rolls back around a [`TxUnitOfWork`]
struct InTransaction<'w, W: ?Sized> {
    settings: TxSettings,
    work: &'w W,
}

#[async_trait]
impl<'w, R, W> UnitOfWork<R> for InTransaction<'w, W>
where
    R: Send + 'static,
    W: TxUnitOfWork<R> + ?Sized,
{
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<R>,
    ) -> Result<()> {
        let mut tx = session.begin(ctx, self.settings).await?;

        match self.work.run(ctx, tx.as_mut(), rows).await {
            Ok(()) => {
                if !tx.is_finished() {
                    tx.commit(ctx).await?;
                }
                Ok(())
            }
            Err(err) => {
                if !tx.is_finished() {
                    if let Err(rollback_err) = tx.rollback(ctx).await {
                        log::debug!(
                            "rollback of transaction {} failed: {}",
                            tx.id(),
                            rollback_err
                        );
                    }
                }
                Err(err)
            }
        }
    }
}

/// One iteration of the retry loop
#[derive(Debug, Clone, Copy)]
struct Attempt {
    number: u32,
    started: Instant,
}

impl Attempt {
    fn first() -> Self {
        Self {
            number: 1,
            started: Instant::now(),
        }
    }

    fn next(self) -> Self {
        Self {
            number: self.number + 1,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What the loop does after a failed attempt
enum Decision {
    Retry(Duration),
    Fail,
}

/// Drives retry loops against one connection
///
/// Coordinators share nothing with each other except the store behind the
/// connection; any number of loops may run concurrently on one coordinator.
pub struct RetryCoordinator {
    connection: Arc<dyn Connection>,
    rng: Mutex<fastrand::Rng>,
}

impl RetryCoordinator {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Coordinator with a seeded jitter generator, for reproducible schedules
    pub fn with_seed(connection: Arc<dyn Connection>, seed: u64) -> Self {
        Self {
            connection,
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Run `work` under `policy`, returning the rows of the successful attempt
    pub async fn execute<R, W>(
        &self,
        ctx: &Context,
        work: &W,
        policy: &RetryPolicy,
    ) -> Result<Vec<R>>
    where
        R: Send + 'static,
        W: UnitOfWork<R> + ?Sized,
    {
        policy.validate()?;
        let started = Instant::now();
        let mut attempt = Attempt::first();

        loop {
            if let Some(done) = ctx.err() {
                return Err(Error::attempted(attempt.number - 1, done));
            }

            log::debug!("attempt {} started", attempt.number);
            let outcome = ctx
                .run(self.attempt(ctx, work, attempt.number))
                .await
                .and_then(|outcome| outcome);

            let err = match outcome {
                Ok(rows) => {
                    if attempt.number > 1 {
                        log::info!(
                            "operation succeeded on attempt {} after {:?}",
                            attempt.number,
                            started.elapsed()
                        );
                    }
                    return Ok(rows);
                }
                Err(err) => err,
            };

            // The context being done overrides whatever the attempt reported
            if let Some(done) = ctx.err() {
                log::debug!(
                    "attempt {} interrupted after {:?}: {}",
                    attempt.number,
                    attempt.elapsed(),
                    done
                );
                return Err(Error::attempted(attempt.number, done));
            }

            let class = policy.classify(&err);
            match self.decide(policy, &err, class, attempt.number, started) {
                Decision::Fail => {
                    log::debug!(
                        "attempt {} failed terminally ({}): {}",
                        attempt.number,
                        class,
                        err
                    );
                    return Err(Error::attempted(attempt.number, err));
                }
                Decision::Retry(delay) => {
                    log::warn!(
                        "attempt {} failed ({}) after {:?}: {}; retrying in {:?}",
                        attempt.number,
                        class,
                        attempt.elapsed(),
                        err,
                        delay
                    );
                    if let Err(done) = ctx.sleep(delay).await {
                        return Err(Error::attempted(attempt.number, done));
                    }
                }
            }

            attempt = attempt.next();
        }
    }

    /// Run `work` inside a transaction begun with `settings` on every attempt
    pub async fn execute_tx<R, W>(
        &self,
        ctx: &Context,
        settings: TxSettings,
        work: &W,
        policy: &RetryPolicy,
    ) -> Result<Vec<R>>
    where
        R: Send + 'static,
        W: TxUnitOfWork<R> + ?Sized,
    {
        let in_tx = InTransaction { settings, work };
        self.execute(ctx, &in_tx, policy).await
    }

    async fn attempt<R, W>(&self, ctx: &Context, work: &W, number: u32) -> Result<Vec<R>>
    where
        R: Send + 'static,
        W: UnitOfWork<R> + ?Sized,
    {
        let mut session = self.connection.session(ctx).await?;
        let mut rows = ResultBuffer::for_attempt(number);
        work.run(ctx, session.as_mut(), &mut rows).await?;
        Ok(rows.drain())
    }

    fn decide(
        &self,
        policy: &RetryPolicy,
        err: &Error,
        class: ErrorClassification,
        attempt: u32,
        started: Instant,
    ) -> Decision {
        if !class.is_retriable(policy.idempotent) {
            return Decision::Fail;
        }
        if attempt >= policy.max_attempts {
            log::warn!("giving up after {} attempts: {}", attempt, err);
            return Decision::Fail;
        }

        let delay = {
            let mut rng = self.rng.lock();
            policy.backoff_for(err).delay(attempt, &mut rng)
        };

        if let Some(max_elapsed) = policy.max_elapsed {
            if started.elapsed() + delay > max_elapsed {
                log::warn!(
                    "giving up after {} attempts, retry budget of {:?} spent: {}",
                    attempt,
                    max_elapsed,
                    err
                );
                return Decision::Fail;
            }
        }

        Decision::Retry(delay)
    }
}
