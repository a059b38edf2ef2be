//! Test fixture for querykit integration tests
//!
//! Every fixture gets its own uniquely named store, so tests never share data.

#![allow(dead_code)]

use querykit::{
    Backoff, Context, Key, MemoryConfig, MemoryStore, Params, QueryHelper, ResultSet,
    RetryCoordinator, RetryPolicy, Row, TxControl,
};
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: &str = "t";
pub const CREATE_TABLE: &str = "CREATE TABLE t (id Int64, val Int64, PRIMARY KEY (id))";
pub const UPSERT: &str = "UPSERT INTO t (id, val) VALUES ($id, $val)";
pub const SELECT_ONE: &str = "SELECT id, val FROM t WHERE id = $id";
pub const SELECT_ALL: &str = "SELECT id, val FROM t ORDER BY id";
pub const INCREMENT_ALL: &str = "UPDATE t SET val = val + 1 RETURNING id, val";

/// Short constant delays so retry timing is easy to reason about
pub fn test_policy() -> RetryPolicy {
    RetryPolicy::default().with_backoff(
        Backoff::constant(Duration::from_millis(10)),
        Backoff::constant(Duration::from_millis(100)),
    )
}

pub fn row_params(id: i64, val: i64) -> Params {
    Params::new().with("id", id).with("val", val)
}

/// Route the fixture's statements to the store
pub fn register_statements(store: &MemoryStore) {
    store.register(CREATE_TABLE, |view, _| {
        view.create_table(TABLE, "id")?;
        Ok(vec![])
    });
    store.register(UPSERT, |view, params| {
        let row = Row::new()
            .with("id", params.require("$id")?.clone())
            .with("val", params.require("$val")?.clone());
        view.upsert(TABLE, row)?;
        Ok(vec![])
    });
    store.register(SELECT_ONE, |view, params| {
        let key = Key::from_value(params.require("$id")?)?;
        let rows = view.get(TABLE, &key)?.into_iter().collect();
        Ok(vec![ResultSet::from_rows(rows)])
    });
    store.register(SELECT_ALL, |view, _| {
        Ok(vec![ResultSet::from_rows(view.scan(TABLE)?)])
    });
    store.register(INCREMENT_ALL, |view, _| {
        let mut updated = Vec::new();
        for row in view.scan(TABLE)? {
            let row = Row::new()
                .with("id", row.get_i64("id")?)
                .with("val", row.get_i64("val")? + 1);
            view.upsert(TABLE, row.clone())?;
            updated.push(row);
        }
        Ok(vec![ResultSet::from_rows(updated)])
    });
}

pub struct TestFixture {
    pub store: MemoryStore,
    pub helper: QueryHelper,
    pub ctx: Context,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::build(MemoryConfig::default(), test_policy()).await
    }

    pub async fn with_policy(policy: RetryPolicy) -> Self {
        Self::build(MemoryConfig::default(), policy).await
    }

    pub async fn build(config: MemoryConfig, policy: RetryPolicy) -> Self {
        let store = MemoryStore::with_config(&format!("test_{}", fastrand::u64(..)), config);
        register_statements(&store);

        let coordinator = Arc::new(RetryCoordinator::with_seed(store.connect(), 42));
        let fixture = TestFixture {
            helper: QueryHelper::with_coordinator(coordinator, policy),
            store,
            ctx: Context::background(),
        };
        fixture
            .helper
            .execute(&fixture.ctx, CREATE_TABLE, &Params::new())
            .await
            .expect("Failed to create table");
        fixture
    }

    /// Insert rows, one committed statement each
    pub async fn seed(&self, rows: &[(i64, i64)]) {
        for (id, val) in rows {
            self.helper
                .execute_tx(&self.ctx, UPSERT, TxControl::serializable_rw(), &row_params(*id, *val))
                .await
                .expect("Failed to seed row");
        }
    }

    /// Committed `val` for `id`, read outside any transaction
    pub fn value(&self, id: i64) -> Option<i64> {
        self.store
            .committed(TABLE, id)
            .expect("table exists")
            .map(|row| row.get_i64("val").expect("val column"))
    }

    /// All rows as `(id, val)` through the facade
    pub async fn rows(&self) -> querykit::Result<Vec<(i64, i64)>> {
        self.helper
            .idempotent(true)
            .query(
                &self.ctx,
                SELECT_ALL,
                TxControl::snapshot_ro(),
                &Params::new(),
                |row: &Row| Ok((row.get_i64("id")?, row.get_i64("val")?)),
            )
            .await
    }
}

/// Read `val` for `id` inside an interactive transaction
pub async fn read_val(
    ctx: &Context,
    tx: &mut dyn querykit::Transaction,
    id: i64,
) -> querykit::Result<i64> {
    let mut stream = tx
        .query(ctx, SELECT_ONE, &Params::new().with("id", id))
        .await?;
    let rows = querykit::read_all(ctx, stream.as_mut()).await?;
    querykit::expect_single(rows)?.get_i64("val")
}
