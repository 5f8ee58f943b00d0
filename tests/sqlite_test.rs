//! End-to-end tests against SQLite files.

use db_session::db::{Database, SqliteProvider, auto_commit, auto_rollback, with_transaction};
use db_session::error::DbError;
use db_session::models::{Record, Selection, Value};
use db_session::vars;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Database {
    let path = dir.path().join("test.db");
    let provider = SqliteProvider::open_url(&format!("sqlite:{}", path.display())).unwrap();
    Database::new(Arc::new(provider)).unwrap()
}

fn with_items(dir: &TempDir) -> Database {
    let db = open(dir);
    db.execute(
        "create table items (id integer primary key, name text not null unique, qty integer)",
        &(),
    )
    .unwrap();
    auto_commit().unwrap();
    db
}

#[test]
fn test_insert_select_get() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);

    let first = db
        .insert("items", &[("name", "apple".into()), ("qty", 3.into())])
        .unwrap();
    let second = db
        .insert("items", &[("name", "pear".into()), ("qty", Value::Null)])
        .unwrap();
    assert_eq!(first, Some(1));
    assert_eq!(second, Some(2));

    let names = db.select("name from items order by id", &()).unwrap();
    assert_eq!(
        names,
        Selection::Values(vec![Value::Text("apple".into()), Value::Text("pear".into())])
    );

    let id = 2;
    let row = db
        .get("id, name, qty from items where id = $id", &vars!(id))
        .unwrap()
        .into_row()
        .unwrap();
    assert_eq!(row.get("name"), Some(&Value::Text("pear".into())));
    assert_eq!(row.get("qty"), Some(&Value::Null));

    let total = db.get("sum(qty) from items", &()).unwrap();
    assert_eq!(total, Record::Value(Value::Int(3)));
    assert!(db.exists("1 from items where name = $n", &vars!(n = "apple")).unwrap());
    assert!(!db.exists("1 from items where name = $n", &vars!(n = "plum")).unwrap());

    auto_rollback().unwrap();
}

#[test]
fn test_commit_is_visible_to_other_handles() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);
    db.execute("insert into items (name) values ($name)", &vars!(name = "fig"))
        .unwrap();
    auto_commit().unwrap();

    let reader = open(&dir);
    let count = reader.get("count(*) from items", &()).unwrap();
    assert_eq!(count, Record::Value(Value::Int(1)));
    auto_rollback().unwrap();
}

#[test]
fn test_rollback_discards_changes() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);
    db.insert("items", &[("name", "kiwi".into())]).unwrap();
    auto_rollback().unwrap();

    let count = db.get("count(*) from items", &()).unwrap();
    assert_eq!(count, Record::Value(Value::Int(0)));
    auto_rollback().unwrap();
}

#[test]
fn test_unique_violation_is_integrity_error() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);
    db.insert("items", &[("name", "lime".into())]).unwrap();
    let err = db.insert("items", &[("name", "lime".into())]).unwrap_err();
    assert!(matches!(err, DbError::Integrity(_)), "got {:?}", err);
    auto_rollback().unwrap();
}

#[test]
fn test_syntax_error_is_programming_error() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let err = db.execute("selec 1", &()).unwrap_err();
    assert!(matches!(err, DbError::Programming(_)), "got {:?}", err);
    auto_rollback().unwrap();
}

#[test]
fn test_with_transaction_rolls_back_failed_work() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);

    let result: Result<(), DbError> = with_transaction(
        || {
            db.insert("items", &[("name", "plum".into())])?;
            db.get("id from items where name = 'missing'", &())?;
            Ok(())
        },
        |_| false,
    );
    assert!(matches!(result, Err(DbError::RowNotFound)));

    assert!(!db.exists("1 from items", &()).unwrap());
    auto_rollback().unwrap();
}

#[test]
fn test_execute_many_counts_rows() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);
    let batch = vec![vars!(name = "a"), vars!(name = "b"), vars!(name = "c")];
    let affected = db
        .execute_many("insert into items (name) values ($name)", &batch)
        .unwrap();
    assert_eq!(affected, 3);
    auto_commit().unwrap();

    let deleted = db
        .execute("delete from items where name != $keep", &vars!(keep = "b"))
        .unwrap()
        .rows_affected();
    assert_eq!(deleted, 2);
    auto_commit().unwrap();
}

#[test]
fn test_select_stops_reading_past_the_limit() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir).with_max_rows(5);
    // an endless result set only terminates if rows are streamed
    db.execute(
        "create view numbers as \
         with recursive n(x) as (select 1 union all select x + 1 from n) select x from n",
        &(),
    )
    .unwrap();
    auto_commit().unwrap();

    let err = db.select("x from numbers", &()).unwrap_err();
    assert!(matches!(err, DbError::TooManyRowsFound { limit: 5 }), "got {:?}", err);
    assert!(db.exists("x from numbers", &()).unwrap());
    let first = db.get("x from numbers limit 1", &()).unwrap();
    assert_eq!(first, Record::Value(Value::Int(1)));
    auto_rollback().unwrap();
}

#[test]
fn test_invalid_utf8_text_reads_as_bytes() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let value = db.get("cast(x'ff41' as text)", &()).unwrap();
    assert_eq!(value, Record::Value(Value::Bytes(vec![0xff, 0x41])));
    let valid = db.get("cast(x'4142' as text)", &()).unwrap();
    assert_eq!(valid, Record::Value(Value::Text("AB".into())));
    auto_rollback().unwrap();
}

#[test]
fn test_last_row_id_only_for_inserts() {
    let dir = TempDir::new().unwrap();
    let db = with_items(&dir);
    let inserted = db
        .execute("insert into items (name) values ($name)", &vars!(name = "fig"))
        .unwrap();
    assert_eq!(inserted.last_row_id(), Some(1));

    let updated = db.execute("update items set qty = 2", &()).unwrap();
    assert_eq!(updated.rows_affected(), 1);
    assert_eq!(updated.last_row_id(), None);

    let deleted = db.execute("delete from items", &()).unwrap();
    assert_eq!(deleted.rows_affected(), 1);
    assert_eq!(deleted.last_row_id(), None);
    auto_rollback().unwrap();
}

#[test]
fn test_exiting_thread_returns_its_connection() {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}?max_connections=1&acquire_timeout=2",
        dir.path().join("test.db").display()
    );
    let db = Database::new(Arc::new(SqliteProvider::open_url(&url).unwrap())).unwrap();
    db.execute("create table items (id integer primary key, name text)", &())
        .unwrap();
    auto_commit().unwrap();

    let worker = db.clone();
    thread::spawn(move || {
        // no commit, rollback or release before the thread ends
        worker.insert("items", &[("name", "left open".into())]).unwrap();
    })
    .join()
    .unwrap();

    // the only pooled connection is back, and the worker's insert is gone
    let count = db.get("count(*) from items", &()).unwrap();
    assert_eq!(count, Record::Value(Value::Int(0)));
    auto_rollback().unwrap();
}
