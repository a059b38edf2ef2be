// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Session capability over [`MemoryStore`]

use super::fault::FaultPoint;
use super::store::{MemoryStore, TxState};
use crate::connection::{Connection, Connector, Session};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::result::{Production, ResultSet, ResultSetPart, ResultStream};
use crate::transaction::{Transaction, TxControl, TxMode, TxSettings};
use crate::value::Params;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SCHEME: &str = "memory://";

#[async_trait]
impl Connector for MemoryStore {
    async fn open(&self, ctx: &Context, target: &str) -> Result<Arc<dyn Connection>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let name = target.strip_prefix(SCHEME).ok_or_else(|| {
            Error::Connection(format!(
                "unsupported target `{}`, expected {}<name>",
                target, SCHEME
            ))
        })?;
        if name != self.name() {
            return Err(Error::Connection(format!("unknown database `{}`", name)));
        }
        self.check_online()?;
        log::debug!("opened connection to {}", target);
        Ok(Arc::new(MemoryConnection::new(self.clone(), target)))
    }
}

impl MemoryStore {
    /// A connection to this store without going through [`Connector::open`]
    pub fn connect(&self) -> Arc<dyn Connection> {
        let target = format!("{}{}", SCHEME, self.name());
        Arc::new(MemoryConnection::new(self.clone(), &target))
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
    target: String,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn new(store: MemoryStore, target: &str) -> Self {
        Self {
            store,
            target: target.to_string(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn session(&self, ctx: &Context) -> Result<Box<dyn Session>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "connection to {} is closed",
                self.target
            )));
        }
        self.store.check_online()?;
        self.store.check_fault(FaultPoint::Session)?;
        tokio::task::yield_now().await;

        let session = MemorySession {
            id: Uuid::new_v4().to_string(),
            store: self.store.clone(),
        };
        log::trace!("session {} acquired", session.id);
        Ok(Box::new(session))
    }

    async fn close(&self, _ctx: &Context) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemorySession {
    id: String,
    store: MemoryStore,
}

impl MemorySession {
    fn check_live(&self, ctx: &Context) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.store.is_offline() {
            return Err(Error::Transport(format!(
                "session {} lost its connection",
                self.id
            )));
        }
        Ok(())
    }

    /// Run one statement in its own transaction as `tx` describes
    ///
    /// The transaction is returned unfinished; the caller commits it.
    fn statement(
        &self,
        statement: &str,
        params: &Params,
        tx: TxControl,
        point: FaultPoint,
    ) -> Result<(Vec<ResultSet>, TxState)> {
        self.store.check_fault(point)?;
        if tx.mode == TxMode::SerializableReadWrite && !tx.commit {
            return Err(Error::InvalidArgument(
                "SERIALIZABLE_RW without commit needs an explicit transaction".to_string(),
            ));
        }

        let mut state = self.store.begin(tx.mode);
        let sets = self.store.run(&mut state, statement, params)?;
        Ok((sets, state))
    }
}

/// Commit `state`, failing first with any fault queued for the commit
fn finish(store: &MemoryStore, state: TxState) -> Result<()> {
    if state.mode() == TxMode::SerializableReadWrite {
        if let Err(err) = store.check_fault(FaultPoint::Commit) {
            store.note_rollback();
            return Err(err);
        }
    }
    store.commit(state)
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
        tx: TxControl,
    ) -> Result<()> {
        self.check_live(ctx)?;
        tokio::task::yield_now().await;
        let (_, state) = self.statement(statement, params, tx, FaultPoint::Exec)?;
        finish(&self.store, state)
    }

    async fn query(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
        tx: TxControl,
    ) -> Result<Box<dyn ResultStream>> {
        self.check_live(ctx)?;
        tokio::task::yield_now().await;
        let (sets, state) = self.statement(statement, params, tx, FaultPoint::Query)?;
        let stream = MemoryResultStream::new(
            sets,
            self.store.config().part_rows,
            self.store.take_stream_fault(),
        );
        // read-write results are only final once the whole stream was read
        if state.mode() == TxMode::SerializableReadWrite {
            return Ok(Box::new(stream.commit_on_exhaust(self.store.clone(), state)));
        }
        finish(&self.store, state)?;
        Ok(Box::new(stream))
    }

    async fn begin(&mut self, ctx: &Context, settings: TxSettings) -> Result<Box<dyn Transaction>> {
        self.check_live(ctx)?;
        if settings.mode == TxMode::None {
            return Err(Error::InvalidArgument(
                "cannot begin a transaction with NO_TX".to_string(),
            ));
        }
        let tx = MemoryTransaction {
            id: Uuid::new_v4().to_string(),
            store: self.store.clone(),
            settings,
            state: Some(self.store.begin(settings.mode)),
        };
        log::trace!("session {} began transaction {} ({})", self.id, tx.id, settings.mode);
        Ok(Box::new(tx))
    }
}

/// Interactive transaction; rolled back on drop unless finished
pub struct MemoryTransaction {
    id: String,
    store: MemoryStore,
    settings: TxSettings,
    state: Option<TxState>,
}

impl MemoryTransaction {
    fn check_live(&self, ctx: &Context) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.state.is_none() {
            return Err(Error::InvalidArgument(format!(
                "transaction {} is already finished",
                self.id
            )));
        }
        if self.store.is_offline() {
            return Err(Error::Transport(format!(
                "transaction {} lost its connection",
                self.id
            )));
        }
        Ok(())
    }

    fn run(&mut self, statement: &str, params: &Params) -> Result<Vec<ResultSet>> {
        match self.state.as_mut() {
            Some(state) => self.store.run(state, statement, params),
            None => Err(Error::InvalidArgument(format!(
                "transaction {} is already finished",
                self.id
            ))),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> TxSettings {
        self.settings
    }

    async fn exec(&mut self, ctx: &Context, statement: &str, params: &Params) -> Result<()> {
        self.check_live(ctx)?;
        tokio::task::yield_now().await;
        self.store.check_fault(FaultPoint::Exec)?;
        self.run(statement, params)?;
        Ok(())
    }

    async fn exec_commit(&mut self, ctx: &Context, statement: &str, params: &Params) -> Result<()> {
        self.exec(ctx, statement, params).await?;
        self.commit(ctx).await
    }

    async fn query(
        &mut self,
        ctx: &Context,
        statement: &str,
        params: &Params,
    ) -> Result<Box<dyn ResultStream>> {
        self.check_live(ctx)?;
        tokio::task::yield_now().await;
        self.store.check_fault(FaultPoint::Query)?;
        let sets = self.run(statement, params)?;
        Ok(Box::new(MemoryResultStream::new(
            sets,
            self.store.config().part_rows,
            self.store.take_stream_fault(),
        )))
    }

    async fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.check_live(ctx)?;
        tokio::task::yield_now().await;
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                return Err(Error::InvalidArgument(format!(
                    "transaction {} is already finished",
                    self.id
                )))
            }
        };
        finish(&self.store, state)
    }

    async fn rollback(&mut self, _ctx: &Context) -> Result<()> {
        match self.state.take() {
            Some(_) => {
                self.store.note_rollback();
                Ok(())
            }
            None => Err(Error::InvalidArgument(format!(
                "transaction {} is already finished",
                self.id
            ))),
        }
    }

    fn is_finished(&self) -> bool {
        self.state.is_none()
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state.take().is_some() {
            self.store.note_rollback();
            log::debug!("transaction {} dropped while active, rolled back", self.id);
        }
    }
}

/// Result sets split into parts of at most `part_rows` rows
///
/// A stream opened by a single read-write statement owns that statement's
/// transaction: it commits when the stream is exhausted and rolls back when
/// the stream fails or is dropped early.
pub struct MemoryResultStream {
    pending: VecDeque<Production<ResultSetPart>>,
    failed: Option<Error>,
    delivered: usize,
    pending_commit: Option<(MemoryStore, TxState)>,
}

impl MemoryResultStream {
    /// Build a stream; with `fault` set, the stream fails after that many rows
    pub(crate) fn new(
        sets: Vec<ResultSet>,
        part_rows: usize,
        mut fault: Option<(usize, Error)>,
    ) -> Self {
        let part_rows = part_rows.max(1);
        let mut pending = VecDeque::new();
        let mut remaining = fault.as_ref().map(|(after_rows, _)| *after_rows);

        'sets: for (index, set) in sets.into_iter().enumerate() {
            if set.rows.is_empty() {
                pending.push_back(Production::HasNext(ResultSetPart {
                    index,
                    columns: set.columns.clone(),
                    rows: Vec::new(),
                }));
                continue;
            }
            for chunk in set.rows.chunks(part_rows) {
                let mut rows = chunk.to_vec();
                let mut cut = false;
                if let Some(left) = remaining.as_mut() {
                    if rows.len() > *left {
                        rows.truncate(*left);
                        cut = true;
                    }
                    *left -= rows.len();
                }
                if !rows.is_empty() {
                    pending.push_back(Production::HasNext(ResultSetPart {
                        index,
                        columns: set.columns.clone(),
                        rows,
                    }));
                }
                if cut {
                    break 'sets;
                }
            }
        }

        if let Some((_, error)) = fault.take() {
            pending.push_back(Production::Error(error));
        }

        Self {
            pending,
            failed: None,
            delivered: 0,
            pending_commit: None,
        }
    }

    pub(crate) fn commit_on_exhaust(mut self, store: MemoryStore, state: TxState) -> Self {
        self.pending_commit = Some((store, state));
        self
    }

    fn fail(&mut self, err: Error) -> Production<ResultSetPart> {
        self.pending.clear();
        if let Some((store, _)) = self.pending_commit.take() {
            store.note_rollback();
        }
        self.failed = Some(err.clone());
        Production::Error(err)
    }
}

impl Drop for MemoryResultStream {
    fn drop(&mut self) {
        if let Some((store, _)) = self.pending_commit.take() {
            store.note_rollback();
            log::debug!("result stream dropped before exhaustion, statement rolled back");
        }
    }
}

#[async_trait]
impl ResultStream for MemoryResultStream {
    async fn next(&mut self, ctx: &Context) -> Production<ResultSetPart> {
        if let Some(err) = &self.failed {
            return Production::Error(err.clone());
        }
        if let Some(err) = ctx.err() {
            return self.fail(err);
        }
        if self.delivered > 0 {
            tokio::task::yield_now().await;
        }
        match self.pending.pop_front() {
            Some(Production::Error(err)) => self.fail(err),
            Some(part) => {
                self.delivered += 1;
                part
            }
            None => match self.pending_commit.take() {
                Some((store, state)) => match finish(&store, state) {
                    Ok(()) => Production::Exhausted,
                    Err(err) => {
                        self.failed = Some(err.clone());
                        Production::Error(err)
                    }
                },
                None => Production::Exhausted,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Row;

    fn rows(n: i64) -> ResultSet {
        ResultSet::from_rows((1..=n).map(|id| Row::new().with("id", id)).collect())
    }

    async fn collect(stream: &mut dyn ResultStream) -> (Vec<usize>, Option<Error>) {
        let ctx = Context::background();
        let mut sizes = Vec::new();
        loop {
            match stream.next(&ctx).await {
                Production::HasNext(part) => sizes.push(part.rows.len()),
                Production::Exhausted => return (sizes, None),
                Production::Error(err) => return (sizes, Some(err)),
            }
        }
    }

    #[tokio::test]
    async fn test_stream_splits_into_parts() {
        let mut stream = MemoryResultStream::new(vec![rows(5)], 2, None);
        let (sizes, err) = collect(&mut stream).await;
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_stream_fault_after_rows() {
        let fault = Some((3, Error::Transport("cut".into())));
        let mut stream = MemoryResultStream::new(vec![rows(5)], 2, fault);
        let (sizes, err) = collect(&mut stream).await;
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(err, Some(Error::Transport("cut".into())));

        // a failed stream stays failed
        let ctx = Context::background();
        assert!(matches!(stream.next(&ctx).await, Production::Error(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_targets() {
        let store = MemoryStore::new("local");
        let ctx = Context::background();

        assert!(store.open(&ctx, "memory://local").await.is_ok());
        assert!(matches!(
            store.open(&ctx, "grpc://localhost:2136").await,
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            store.open(&ctx, "memory://other").await,
            Err(Error::Connection(_))
        ));

        store.set_offline(true);
        assert!(matches!(
            store.open(&ctx, "memory://local").await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_sessions() {
        let store = MemoryStore::new("local");
        let ctx = Context::background();
        let connection = store.connect();
        assert!(connection.session(&ctx).await.is_ok());

        connection.close(&ctx).await.unwrap();
        assert!(matches!(
            connection.session(&ctx).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new("local");
        store.register("create", |view, _| {
            view.create_table("t", "id")?;
            Ok(vec![])
        });
        store.register("write", |view, _| {
            view.upsert("t", Row::new().with("id", 1i64).with("val", 1i64))?;
            Ok(vec![])
        });
        let ctx = Context::background();
        let mut session = store.connect().session(&ctx).await.unwrap();
        session
            .exec(&ctx, "create", &Params::new(), TxControl::no_tx())
            .await
            .unwrap();

        {
            let mut tx = session.begin(&ctx, TxSettings::serializable_rw()).await.unwrap();
            tx.exec(&ctx, "write", &Params::new()).await.unwrap();
        }

        assert!(store.committed("t", 1i64).unwrap().is_none());
        assert_eq!(store.stats().rollbacks, 1);
    }

    fn store_with_writer() -> MemoryStore {
        let store = MemoryStore::new("local");
        store.register("create", |view, _| {
            view.create_table("t", "id")?;
            Ok(vec![])
        });
        store.register("write returning", |view, _| {
            let row = Row::new().with("id", 1i64).with("val", 1i64);
            view.upsert("t", row.clone())?;
            Ok(vec![ResultSet::from_rows(vec![row])])
        });
        store
    }

    #[tokio::test]
    async fn test_rw_query_commits_when_exhausted() {
        let store = store_with_writer();
        let ctx = Context::background();
        let mut session = store.connect().session(&ctx).await.unwrap();
        session
            .exec(&ctx, "create", &Params::new(), TxControl::no_tx())
            .await
            .unwrap();

        let mut stream = session
            .query(&ctx, "write returning", &Params::new(), TxControl::serializable_rw())
            .await
            .unwrap();
        assert!(store.committed("t", 1i64).unwrap().is_none());

        let (sizes, err) = collect(stream.as_mut()).await;
        assert_eq!(sizes, vec![1]);
        assert!(err.is_none());
        assert!(store.committed("t", 1i64).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rw_query_rolls_back_on_stream_failure_or_drop() {
        let store = store_with_writer();
        let ctx = Context::background();
        let mut session = store.connect().session(&ctx).await.unwrap();
        session
            .exec(&ctx, "create", &Params::new(), TxControl::no_tx())
            .await
            .unwrap();

        store.inject(
            FaultPoint::Stream { after_rows: 0 },
            Error::Transport("cut".into()),
        );
        let mut stream = session
            .query(&ctx, "write returning", &Params::new(), TxControl::serializable_rw())
            .await
            .unwrap();
        let (_, err) = collect(stream.as_mut()).await;
        assert_eq!(err, Some(Error::Transport("cut".into())));
        assert_eq!(store.stats().rollbacks, 1);

        let stream = session
            .query(&ctx, "write returning", &Params::new(), TxControl::serializable_rw())
            .await
            .unwrap();
        drop(stream);

        assert!(store.committed("t", 1i64).unwrap().is_none());
        assert_eq!(store.stats().rollbacks, 2);
    }

    #[tokio::test]
    async fn test_rw_statement_without_commit_rejected() {
        let store = MemoryStore::new("local");
        let ctx = Context::background();
        let mut session = store.connect().session(&ctx).await.unwrap();
        let err = session
            .exec(
                &ctx,
                "anything",
                &Params::new(),
                TxControl::serializable_rw().with_commit(false),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
