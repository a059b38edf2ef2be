// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Statements used by the tutorial programs and their in-memory routines
//!
//! The statement text is what a client would send to a SQL store. For the
//! in-memory store each text is routed to a routine that performs the same
//! reads and writes through a [`TxView`].

use querykit::{Error, Key, MemoryStore, Params, ResultSet, Result, Row, TxView, Value};

pub const ISSUES: &str = "issues";
pub const LINKS: &str = "links";
pub const COUNTER: &str = "t";

pub const CREATE_ISSUES: &str = "
    CREATE TABLE IF NOT EXISTS issues (
        id Int64 NOT NULL,
        title Text,
        created_at Timestamp,
        author Text,
        link_count Int64,
        status Text,
        PRIMARY KEY (id)
    );
    CREATE TABLE IF NOT EXISTS links (
        source Int64,
        destination Int64,
        PRIMARY KEY (source, destination)
    );";

pub const DROP_ISSUES: &str = "
    DROP TABLE IF EXISTS issues;
    DROP TABLE IF EXISTS links;";

pub const UPSERT_ISSUE: &str = "
    UPSERT INTO issues (id, title, created_at, author)
    VALUES ($id, $title, $created_at, $author);";

pub const SELECT_ISSUE_BY_ID: &str = "
    SELECT id, title, created_at, author, COALESCE(link_count, 0) AS link_count, status
    FROM issues
    WHERE id = $id;";

pub const SELECT_ISSUES: &str = "
    SELECT id, title, created_at, author, COALESCE(link_count, 0) AS link_count, status
    FROM issues;";

pub const UPDATE_STATUS: &str = "
    UPDATE issues
    SET status = $new_status
    WHERE id = $id;";

pub const INCREMENT_LINKS: &str = "
    UPDATE issues
    SET link_count = COALESCE(link_count, 0) + 1
    WHERE id IN ($t1, $t2);";

pub const INSERT_LINKS: &str = "
    INSERT INTO links (source, destination)
    VALUES ($t1, $t2), ($t2, $t1);";

pub const SELECT_LINK_COUNTS: &str = "
    SELECT id, link_count FROM issues
    WHERE id IN ($t1, $t2);";

pub const LINK_ISSUES_BATCH: &str = "
    UPDATE issues
    SET link_count = COALESCE(link_count, 0) + 1
    WHERE id IN ($t1, $t2);

    INSERT INTO links (source, destination)
    VALUES ($t1, $t2), ($t2, $t1);

    SELECT id, link_count FROM issues
    WHERE id IN ($t1, $t2);";

pub const DROP_COUNTER: &str = "DROP TABLE IF EXISTS t;";

pub const CREATE_COUNTER: &str = "
    CREATE TABLE t (
        id Int64,
        val Int64,
        PRIMARY KEY (id)
    );";

pub const UPSERT_COUNTER: &str = "UPSERT INTO t (id, val) VALUES ($id, $val);";

pub const SELECT_COUNTER: &str = "SELECT val FROM t WHERE id = $id;";

pub const LOCKS_TABLE: &str = "whole_table_locks";

pub const DROP_LOCKS_TABLE: &str = "DROP TABLE IF EXISTS whole_table_locks;";

pub const CREATE_LOCKS_TABLE: &str = "
    CREATE TABLE whole_table_locks (
        id Int64,
        val Int64,
        PRIMARY KEY (id)
    );";

pub const FILL_LOCKS_TABLE: &str = "
    UPSERT INTO whole_table_locks
    SELECT id, val FROM AS_TABLE($rows);";

pub const UPSERT_LOCKS_ROW: &str =
    "UPSERT INTO whole_table_locks (id, val) VALUES ($id, $val);";

pub const SUM_LOCKS_TABLE: &str =
    "SELECT COUNT(*) AS row_count, SUM(val) AS total FROM whole_table_locks;";

/// Route the issue tracker statements to `store`
pub fn register_issues(store: &MemoryStore) {
    store.register(CREATE_ISSUES, |view, _| {
        if !view.has_table(ISSUES) {
            view.create_table(ISSUES, "id")?;
        }
        if !view.has_table(LINKS) {
            view.create_table(LINKS, "link")?;
        }
        Ok(vec![])
    });

    store.register(DROP_ISSUES, |view, _| {
        view.drop_table(ISSUES)?;
        view.drop_table(LINKS)?;
        Ok(vec![])
    });

    store.register(UPSERT_ISSUE, |view, params| {
        let row = Row::new()
            .with("id", params.require("id")?.clone())
            .with("title", params.require("title")?.clone())
            .with("created_at", params.require("created_at")?.clone())
            .with("author", params.get("author").cloned().unwrap_or(Value::Null));
        view.upsert(ISSUES, row)?;
        Ok(vec![])
    });

    store.register(SELECT_ISSUE_BY_ID, |view, params| {
        let key = Key::from_value(params.require("id")?)?;
        let rows = view.get(ISSUES, &key)?.iter().map(project_issue).collect();
        Ok(vec![ResultSet::new(issue_columns(), rows)])
    });

    store.register(SELECT_ISSUES, |view, _| {
        let rows = view.scan(ISSUES)?.iter().map(project_issue).collect();
        Ok(vec![ResultSet::new(issue_columns(), rows)])
    });

    store.register(UPDATE_STATUS, |view, params| {
        let key = Key::from_value(params.require("id")?)?;
        if view.get(ISSUES, &key)?.is_some() {
            let row = Row::new()
                .with("id", key.to_value())
                .with("status", params.require("new_status")?.clone());
            view.upsert(ISSUES, row)?;
        }
        Ok(vec![])
    });

    store.register(INCREMENT_LINKS, |view, params| {
        increment_links(view, params)?;
        Ok(vec![])
    });

    store.register(INSERT_LINKS, |view, params| {
        insert_links(view, params)?;
        Ok(vec![])
    });

    store.register(SELECT_LINK_COUNTS, |view, params| {
        Ok(vec![link_counts(view, params)?])
    });

    store.register(LINK_ISSUES_BATCH, |view, params| {
        increment_links(view, params)?;
        insert_links(view, params)?;
        Ok(vec![link_counts(view, params)?])
    });
}

/// Route the single-counter statements to `store`
pub fn register_counter(store: &MemoryStore) {
    store.register(DROP_COUNTER, |view, _| {
        view.drop_table(COUNTER)?;
        Ok(vec![])
    });

    store.register(CREATE_COUNTER, |view, _| {
        view.create_table(COUNTER, "id")?;
        Ok(vec![])
    });

    store.register(UPSERT_COUNTER, |view, params| {
        let row = Row::new()
            .with("id", params.require("id")?.clone())
            .with("val", params.require("val")?.clone());
        view.upsert(COUNTER, row)?;
        Ok(vec![])
    });

    store.register(SELECT_COUNTER, |view, params| {
        let key = Key::from_value(params.require("id")?)?;
        let rows = view
            .get(COUNTER, &key)?
            .map(|row| Row::new().with("val", row.get("val").cloned().unwrap_or(Value::Null)))
            .into_iter()
            .collect();
        Ok(vec![ResultSet::new(vec!["val".to_string()], rows)])
    });
}

/// Route the whole-table-locks statements to `store`
pub fn register_table_locks(store: &MemoryStore) {
    store.register(DROP_LOCKS_TABLE, |view, _| {
        view.drop_table(LOCKS_TABLE)?;
        Ok(vec![])
    });

    store.register(CREATE_LOCKS_TABLE, |view, _| {
        view.create_table(LOCKS_TABLE, "id")?;
        Ok(vec![])
    });

    store.register(FILL_LOCKS_TABLE, |view, params| {
        let rows = match params.require("rows")? {
            Value::List(items) => items,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "$rows must be a List, got {}",
                    other.type_name()
                )))
            }
        };
        for item in rows {
            view.upsert(LOCKS_TABLE, struct_row(item)?)?;
        }
        Ok(vec![])
    });

    store.register(UPSERT_LOCKS_ROW, |view, params| {
        let row = Row::new()
            .with("id", params.require("id")?.clone())
            .with("val", params.require("val")?.clone());
        view.upsert(LOCKS_TABLE, row)?;
        Ok(vec![])
    });

    // reads every row, so any later commit to the table invalidates the reader
    store.register(SUM_LOCKS_TABLE, |view, _| {
        let rows = view.scan(LOCKS_TABLE)?;
        let mut total = 0i64;
        for row in &rows {
            total += row.get_i64("val")?;
        }
        let summary = Row::new()
            .with("row_count", rows.len() as i64)
            .with("total", total);
        Ok(vec![ResultSet::new(
            vec!["row_count".to_string(), "total".to_string()],
            vec![summary],
        )])
    });
}

fn struct_row(value: &Value) -> Result<Row> {
    match value {
        Value::Struct(fields) => Ok(fields
            .iter()
            .fold(Row::new(), |row, (name, value)| row.with(name.as_str(), value.clone()))),
        other => Err(Error::TypeMismatch(format!(
            "expected a Struct row, got {}",
            other.type_name()
        ))),
    }
}

fn issue_columns() -> Vec<String> {
    ["id", "title", "created_at", "author", "link_count", "status"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn project_issue(row: &Row) -> Row {
    let column = |name: &str| row.get(name).cloned().unwrap_or(Value::Null);
    Row::new()
        .with("id", column("id"))
        .with("title", column("title"))
        .with("created_at", column("created_at"))
        .with("author", column("author"))
        .with("link_count", link_count_of(row))
        .with("status", column("status"))
}

/// `link_count` is NULL until the first link is made
fn link_count_of(row: &Row) -> i64 {
    match row.get("link_count") {
        Some(Value::Int64(n)) => *n,
        _ => 0,
    }
}

fn linked_ids(params: &Params) -> Result<(Key, Key)> {
    let t1 = Key::from_value(params.require("t1")?)?;
    let t2 = Key::from_value(params.require("t2")?)?;
    Ok((t1, t2))
}

fn increment_links(view: &mut TxView<'_>, params: &Params) -> Result<()> {
    let (t1, t2) = linked_ids(params)?;
    let mut ids = vec![t1];
    if t2 != ids[0] {
        ids.push(t2);
    }
    for id in ids {
        if let Some(row) = view.get(ISSUES, &id)? {
            let update = Row::new()
                .with("id", id.to_value())
                .with("link_count", link_count_of(&row) + 1);
            view.upsert(ISSUES, update)?;
        }
    }
    Ok(())
}

fn insert_links(view: &mut TxView<'_>, params: &Params) -> Result<()> {
    let (t1, t2) = linked_ids(params)?;
    for (source, destination) in [(&t1, &t2), (&t2, &t1)] {
        let link = Key::Text(format!("{}->{}", source, destination));
        if view.get(LINKS, &link)?.is_some() {
            return Err(Error::InvalidArgument(format!(
                "link {} -> {} already exists",
                source, destination
            )));
        }
        let row = Row::new()
            .with("link", link.to_value())
            .with("source", source.to_value())
            .with("destination", destination.to_value());
        view.upsert(LINKS, row)?;
    }
    Ok(())
}

fn link_counts(view: &mut TxView<'_>, params: &Params) -> Result<ResultSet> {
    let (t1, t2) = linked_ids(params)?;
    let mut rows = Vec::new();
    for id in [t1, t2] {
        if let Some(row) = view.get(ISSUES, &id)? {
            rows.push(
                Row::new()
                    .with("id", id.to_value())
                    .with("link_count", link_count_of(&row)),
            );
        }
    }
    Ok(ResultSet::new(
        vec!["id".to_string(), "link_count".to_string()],
        rows,
    ))
}
