// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Multi-version in-memory tables with optimistic concurrency control
//!
//! Every commit takes the next sequence number. A transaction reads the
//! newest version of each row at or below its snapshot, plus its own
//! buffered writes. Serializable read-write commits are validated against
//! everything the transaction read, scanned or wrote: if any of it changed
//! after the snapshot the commit fails with [`Error::Conflict`] and the first
//! committer wins.
//!
//! Statements are not parsed. Statement text selects a routine registered
//! with [`MemoryStore::register`]; the routine works on a [`TxView`].

use super::fault::{FaultPoint, FaultQueue};
use super::MemoryConfig;
use crate::error::{Error, Result};
use crate::result::ResultSet;
use crate::transaction::TxMode;
use crate::value::{Params, Row, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Statement implementation for the in-memory store
pub type Routine = dyn Fn(&mut TxView<'_>, &Params) -> Result<Vec<ResultSet>> + Send + Sync;

/// Primary key of a row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Uint(u64),
    Text(String),
}

impl Key {
    pub fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::Int64(v) => Ok(Key::Int(*v)),
            Value::Uint64(v) => Ok(Key::Uint(*v)),
            Value::Text(v) => Ok(Key::Text(v.clone())),
            other => Err(Error::TypeMismatch(format!(
                "{} cannot be a primary key",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(v) => Value::Int64(*v),
            Key::Uint(v) => Value::Uint64(*v),
            Key::Text(v) => Value::Text(v.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Uint(v) => write!(f, "{}", v),
            Key::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::Uint(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Text(v)
    }
}

/// One committed version of a row; `None` marks a delete
#[derive(Debug, Clone)]
struct Version {
    seq: u64,
    row: Option<Row>,
}

fn visible(versions: &[Version], snapshot: u64) -> Option<&Row> {
    versions
        .iter()
        .rev()
        .find(|version| version.seq <= snapshot)
        .and_then(|version| version.row.as_ref())
}

#[derive(Debug)]
struct Table {
    key_column: String,
    created: u64,
    last_write: u64,
    rows: BTreeMap<Key, Vec<Version>>,
}

impl Table {
    fn new(key_column: &str, created: u64) -> Self {
        Self {
            key_column: key_column.to_string(),
            created,
            last_write: created,
            rows: BTreeMap::new(),
        }
    }

    fn visible(&self, key: &Key, snapshot: u64) -> Option<&Row> {
        self.rows
            .get(key)
            .and_then(|versions| visible(versions, snapshot))
    }

    fn changed_since(&self, key: &Key, snapshot: u64) -> bool {
        self.created > snapshot
            || self
                .rows
                .get(key)
                .and_then(|versions| versions.last())
                .map_or(false, |version| version.seq > snapshot)
    }

    fn key_of(&self, row: &Row) -> Result<Key> {
        let value = row.get(&self.key_column).ok_or_else(|| {
            Error::InvalidArgument(format!("row is missing key column `{}`", self.key_column))
        })?;
        Key::from_value(value)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    seq: u64,
    tables: BTreeMap<String, Table>,
}

impl StoreState {
    fn validate(&self, tx: &TxState) -> Result<()> {
        for (name, key) in tx.reads.iter().chain(tx.writes.keys()) {
            let table = self.tables.get(name).ok_or_else(|| {
                Error::Conflict(format!("table `{}` was dropped", name))
            })?;
            if table.changed_since(key, tx.snapshot) {
                return Err(Error::Conflict(format!(
                    "row {} of `{}` changed after snapshot {}",
                    key, name, tx.snapshot
                )));
            }
        }
        for name in &tx.scans {
            match self.tables.get(name) {
                Some(table) if table.last_write <= tx.snapshot => {}
                _ => {
                    return Err(Error::Conflict(format!(
                        "table `{}` changed after snapshot {}",
                        name, tx.snapshot
                    )))
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: BTreeMap<(String, Key), Option<Row>>) -> Result<u64> {
        if let Some((name, _)) = writes.keys().find(|(name, _)| !self.tables.contains_key(name)) {
            return Err(Error::Scheme(format!("table `{}` does not exist", name)));
        }
        self.seq += 1;
        let seq = self.seq;
        for ((name, key), row) in writes {
            if let Some(table) = self.tables.get_mut(&name) {
                table.rows.entry(key).or_default().push(Version { seq, row });
                table.last_write = seq;
            }
        }
        Ok(seq)
    }
}

/// Private state of one transaction (or one autocommit statement)
#[derive(Debug)]
pub(crate) struct TxState {
    mode: TxMode,
    snapshot: u64,
    reads: HashSet<(String, Key)>,
    scans: HashSet<String>,
    writes: BTreeMap<(String, Key), Option<Row>>,
}

impl TxState {
    pub(crate) fn mode(&self) -> TxMode {
        self.mode
    }

    pub(crate) fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }
}

/// What a routine sees: the store at the transaction's snapshot
pub struct TxView<'a> {
    state: &'a mut StoreState,
    tx: &'a mut TxState,
}

impl<'a> TxView<'a> {
    pub fn mode(&self) -> TxMode {
        self.tx.mode
    }

    pub fn snapshot(&self) -> u64 {
        self.tx.snapshot
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.tables.contains_key(name)
    }

    /// Create a table keyed by `key_column`; schema changes need `NO_TX`
    pub fn create_table(&mut self, name: &str, key_column: &str) -> Result<()> {
        self.require_no_tx("CREATE TABLE")?;
        if self.state.tables.contains_key(name) {
            return Err(Error::Scheme(format!("table `{}` already exists", name)));
        }
        self.state.seq += 1;
        let table = Table::new(key_column, self.state.seq);
        self.state.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Drop a table, returning whether it existed
    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        self.require_no_tx("DROP TABLE")?;
        let dropped = self.state.tables.remove(name).is_some();
        if dropped {
            self.state.seq += 1;
        }
        Ok(dropped)
    }

    pub fn get(&mut self, table: &str, key: &Key) -> Result<Option<Row>> {
        let pending = (table.to_string(), key.clone());
        let committed = self.table(table)?.visible(key, self.tx.snapshot).cloned();
        if let Some(write) = self.tx.writes.get(&pending) {
            return Ok(write.clone());
        }
        self.tx.reads.insert(pending);
        Ok(committed)
    }

    /// All visible rows of a table in key order
    pub fn scan(&mut self, table: &str) -> Result<Vec<Row>> {
        let snapshot = self.tx.snapshot;
        let mut rows: BTreeMap<Key, Row> = self
            .table(table)?
            .rows
            .iter()
            .filter_map(|(key, versions)| {
                visible(versions, snapshot).map(|row| (key.clone(), row.clone()))
            })
            .collect();
        for ((name, key), write) in &self.tx.writes {
            if name != table {
                continue;
            }
            match write {
                Some(row) => {
                    rows.insert(key.clone(), row.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        self.tx.scans.insert(table.to_string());
        Ok(rows.into_values().collect())
    }

    /// Insert or update a row; columns not in `row` keep their current values
    pub fn upsert(&mut self, table: &str, row: Row) -> Result<()> {
        self.require_writable()?;
        let snapshot = self.tx.snapshot;
        let target = self.table(table)?;
        let key = target.key_of(&row)?;
        let current = match self.tx.writes.get(&(table.to_string(), key.clone())) {
            Some(write) => write.clone(),
            None => target.visible(&key, snapshot).cloned(),
        };
        let merged = match current {
            Some(existing) => merge(existing, &row),
            None => row,
        };
        self.tx.writes.insert((table.to_string(), key), Some(merged));
        Ok(())
    }

    pub fn delete(&mut self, table: &str, key: &Key) -> Result<()> {
        self.require_writable()?;
        self.table(table)?;
        self.tx.writes.insert((table.to_string(), key.clone()), None);
        Ok(())
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.state
            .tables
            .get(name)
            .ok_or_else(|| Error::Scheme(format!("table `{}` does not exist", name)))
    }

    fn require_no_tx(&self, operation: &str) -> Result<()> {
        if self.tx.mode != TxMode::None {
            return Err(Error::Scheme(format!(
                "{} must run with NO_TX, not {}",
                operation, self.tx.mode
            )));
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if !self.tx.mode.allows_writes() {
            return Err(Error::InvalidArgument(format!(
                "write attempted in a {} transaction",
                self.tx.mode
            )));
        }
        Ok(())
    }
}

fn merge(mut base: Row, update: &Row) -> Row {
    for (name, value) in update.columns().zip(update.values()) {
        base.set(name, value.clone());
    }
    base
}

/// Counters for what the store has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub conflicts: u64,
    pub rollbacks: u64,
}

pub(crate) struct StoreInner {
    name: String,
    config: MemoryConfig,
    state: Mutex<StoreState>,
    routines: RwLock<HashMap<String, Arc<Routine>>>,
    faults: FaultQueue,
    offline: AtomicBool,
    commits: AtomicU64,
    conflicts: AtomicU64,
    rollbacks: AtomicU64,
}

/// An in-process store implementing the session capability
///
/// Clones share the same data.
///
/// # Examples
///
/// ```ignore
/// let store = MemoryStore::new("local");
/// store.register("CREATE TABLE t", |view, _params| {
///     view.create_table("t", "id")?;
///     Ok(vec![])
/// });
/// let connection = store.connect();
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, MemoryConfig::default())
    }

    pub fn with_config(name: &str, config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: name.to_string(),
                config,
                state: Mutex::new(StoreState::default()),
                routines: RwLock::new(HashMap::new()),
                faults: FaultQueue::default(),
                offline: AtomicBool::new(false),
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// Route `statement` to `routine`, replacing any earlier registration
    pub fn register<F>(&self, statement: &str, routine: F)
    where
        F: Fn(&mut TxView<'_>, &Params) -> Result<Vec<ResultSet>> + Send + Sync + 'static,
    {
        self.inner
            .routines
            .write()
            .insert(statement.trim().to_string(), Arc::new(routine));
    }

    /// Queue a one-shot failure at `point`
    pub fn inject(&self, point: FaultPoint, error: Error) {
        self.inner.faults.push(point, error);
    }

    pub fn pending_faults(&self) -> usize {
        self.inner.faults.len()
    }

    pub fn clear_faults(&self) {
        self.inner.faults.clear();
    }

    /// While offline, connecting and acquiring sessions fail
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            commits: self.inner.commits.load(Ordering::Relaxed),
            conflicts: self.inner.conflicts.load(Ordering::Relaxed),
            rollbacks: self.inner.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Latest committed version of a row, outside any transaction
    pub fn committed(&self, table: &str, key: impl Into<Key>) -> Result<Option<Row>> {
        let state = self.inner.state.lock();
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| Error::Scheme(format!("table `{}` does not exist", table)))?;
        Ok(table.visible(&key.into(), state.seq).cloned())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.state.lock().tables.keys().cloned().collect()
    }

    pub(crate) fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(Error::Connection(format!(
                "store `{}` is offline",
                self.inner.name
            )));
        }
        Ok(())
    }

    pub(crate) fn check_fault(&self, point: FaultPoint) -> Result<()> {
        self.inner.faults.check(point)
    }

    pub(crate) fn take_stream_fault(&self) -> Option<(usize, Error)> {
        match self.inner.faults.take(FaultPoint::Stream { after_rows: 0 }) {
            Some((FaultPoint::Stream { after_rows }, error)) => Some((after_rows, error)),
            _ => None,
        }
    }

    pub(crate) fn begin(&self, mode: TxMode) -> TxState {
        TxState {
            mode,
            snapshot: self.inner.state.lock().seq,
            reads: HashSet::new(),
            scans: HashSet::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Run a registered routine inside `tx`
    pub(crate) fn run(
        &self,
        tx: &mut TxState,
        statement: &str,
        params: &Params,
    ) -> Result<Vec<ResultSet>> {
        let routine = self
            .inner
            .routines
            .read()
            .get(statement.trim())
            .cloned()
            .ok_or_else(|| Error::Scheme(format!("unknown statement: {}", statement.trim())))?;

        let mut state = self.inner.state.lock();
        let mut view = TxView {
            state: &mut *state,
            tx,
        };
        routine(&mut view, params)
    }

    /// Validate and publish `tx`
    ///
    /// Serializable read-write transactions are validated even when they only
    /// read: a row or table they saw may have changed since their snapshot.
    pub(crate) fn commit(&self, tx: TxState) -> Result<()> {
        let mut state = self.inner.state.lock();
        if tx.mode == TxMode::SerializableReadWrite {
            if let Err(err) = state.validate(&tx) {
                self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
                log::debug!("commit rejected: {}", err);
                return Err(err);
            }
        }
        if tx.has_writes() {
            let seq = state.apply(tx.writes)?;
            log::trace!("committed at sequence {}", seq);
        }
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn note_rollback(&self) {
        self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.inner.name)
            .field("offline", &self.is_offline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new("test");
        store.register("create", |view, _| {
            view.create_table("t", "id")?;
            Ok(vec![])
        });
        store.register("set", |view, params| {
            let id = params.require("$id")?.as_i64()?;
            let val = params.require("$val")?.as_i64()?;
            view.upsert("t", Row::new().with("id", id).with("val", val))?;
            Ok(vec![])
        });
        store.register("get", |view, params| {
            let id = params.require("$id")?.as_i64()?;
            let rows = view.get("t", &Key::Int(id))?.into_iter().collect();
            Ok(vec![ResultSet::from_rows(rows)])
        });
        store.register("scan", |view, _| Ok(vec![ResultSet::from_rows(view.scan("t")?)]));

        let mut ddl = store.begin(TxMode::None);
        store.run(&mut ddl, "create", &Params::new()).unwrap();
        store
    }

    fn set(id: i64, val: i64) -> Params {
        Params::new().with("id", id).with("val", val)
    }

    fn autocommit(store: &MemoryStore, id: i64, val: i64) {
        let mut tx = store.begin(TxMode::None);
        store.run(&mut tx, "set", &set(id, val)).unwrap();
        store.commit(tx).unwrap();
    }

    #[test]
    fn test_snapshot_does_not_see_later_commits() {
        let store = store_with_table();
        autocommit(&store, 1, 0);

        let mut reader = store.begin(TxMode::SnapshotReadOnly);
        autocommit(&store, 1, 5);

        let sets = store
            .run(&mut reader, "get", &Params::new().with("id", 1i64))
            .unwrap();
        assert_eq!(sets[0].rows[0].get_i64("val").unwrap(), 0);
        assert_eq!(
            store.committed("t", 1i64).unwrap().unwrap().get_i64("val").unwrap(),
            5
        );
    }

    #[test]
    fn test_first_committer_wins() {
        let store = store_with_table();
        autocommit(&store, 1, 0);

        let mut first = store.begin(TxMode::SerializableReadWrite);
        let mut second = store.begin(TxMode::SerializableReadWrite);
        for tx in [&mut first, &mut second] {
            store
                .run(tx, "get", &Params::new().with("id", 1i64))
                .unwrap();
            store.run(tx, "set", &set(1, 1)).unwrap();
        }

        store.commit(first).unwrap();
        let err = store.commit(second).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.stats().conflicts, 1);
    }

    #[test]
    fn test_scan_conflicts_with_phantom_insert() {
        let store = store_with_table();
        let mut tx = store.begin(TxMode::SerializableReadWrite);
        store.run(&mut tx, "scan", &Params::new()).unwrap();
        store.run(&mut tx, "set", &set(1, 1)).unwrap();

        autocommit(&store, 2, 2);

        assert!(store.commit(tx).unwrap_err().is_conflict());
    }

    #[test]
    fn test_read_only_serializable_scan_is_validated() {
        let store = store_with_table();
        autocommit(&store, 1, 1);

        let mut scanner = store.begin(TxMode::SerializableReadWrite);
        store.run(&mut scanner, "scan", &Params::new()).unwrap();
        autocommit(&store, 1, 2);
        assert!(store.commit(scanner).unwrap_err().is_conflict());

        let mut reader = store.begin(TxMode::SnapshotReadOnly);
        store.run(&mut reader, "scan", &Params::new()).unwrap();
        autocommit(&store, 2, 2);
        store.commit(reader).unwrap();
        assert_eq!(store.stats().conflicts, 1);
    }

    #[test]
    fn test_read_your_own_writes_and_merge() {
        let store = store_with_table();
        store.register("title", |view, _| {
            view.upsert("t", Row::new().with("id", 1i64).with("title", "x"))?;
            Ok(vec![])
        });
        let mut tx = store.begin(TxMode::SerializableReadWrite);
        store.run(&mut tx, "set", &set(1, 9)).unwrap();
        store.run(&mut tx, "title", &Params::new()).unwrap();
        let sets = store
            .run(&mut tx, "get", &Params::new().with("id", 1i64))
            .unwrap();
        let row = &sets[0].rows[0];
        assert_eq!(row.get_i64("val").unwrap(), 9);
        assert_eq!(row.get_text("title").unwrap(), "x");

        assert!(store.committed("t", 1i64).unwrap().is_none());
        store.commit(tx).unwrap();
        assert!(store.committed("t", 1i64).unwrap().is_some());
    }

    #[test]
    fn test_mode_restrictions() {
        let store = store_with_table();

        let mut ro = store.begin(TxMode::SnapshotReadOnly);
        assert!(matches!(
            store.run(&mut ro, "set", &set(1, 1)),
            Err(Error::InvalidArgument(_))
        ));

        let mut rw = store.begin(TxMode::SerializableReadWrite);
        assert!(matches!(
            store.run(&mut rw, "create", &Params::new()),
            Err(Error::Scheme(_))
        ));

        let mut none = store.begin(TxMode::None);
        assert!(matches!(
            store.run(&mut none, "missing statement", &Params::new()),
            Err(Error::Scheme(_))
        ));
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&Value::Int64(3)).unwrap(), Key::Int(3));
        assert_eq!(
            Key::from_value(&Value::Text("a".into())).unwrap(),
            Key::from("a")
        );
        assert!(Key::from_value(&Value::Double(1.0)).is_err());
    }
}
