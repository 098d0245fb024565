//! Text and blob round trips through the native library

use pretty_assertions::assert_eq;
use sqlbind::{ColumnType, Connection, StepResult, Value};

fn round_trip_text(conn: &Connection, text: &str) -> Option<String> {
    let mut stmt = conn.prepare("SELECT ?1").unwrap();
    stmt.bind_text(1, text).unwrap();
    assert_eq!(stmt.step().unwrap(), StepResult::Row);
    stmt.column_text(0).unwrap()
}

fn round_trip_blob(conn: &Connection, bytes: &[u8]) -> Option<Vec<u8>> {
    let mut stmt = conn.prepare("SELECT ?1").unwrap();
    stmt.bind_blob(1, bytes).unwrap();
    assert_eq!(stmt.step().unwrap(), StepResult::Row);
    stmt.column_blob(0).unwrap()
}

#[test]
fn test_text_round_trip() {
    let conn = Connection::open_in_memory().unwrap();
    for text in ["hi", "héllo wörld", "日本語テキスト", "emoji 🦀✓", "a\0b", ""] {
        assert_eq!(round_trip_text(&conn, text).as_deref(), Some(text), "{:?}", text);
    }
}

#[test]
fn test_empty_text_is_not_null() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT ?1, typeof(?1)").unwrap();
    stmt.bind_text(1, "").unwrap();
    stmt.step().unwrap();

    assert_eq!(stmt.column_type(0).unwrap(), ColumnType::Text);
    assert_eq!(stmt.column_text(1).unwrap().as_deref(), Some("text"));
    assert_eq!(stmt.column_bytes(0).unwrap(), 0);
}

#[test]
fn test_text_byte_length() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT ?1").unwrap();
    stmt.bind_text(1, "日本").unwrap();
    stmt.step().unwrap();

    assert_eq!(stmt.column_text(0).unwrap().as_deref(), Some("日本"));
    assert_eq!(stmt.column_bytes(0).unwrap(), 6);
}

#[test]
fn test_blob_round_trip() {
    let conn = Connection::open_in_memory().unwrap();
    let samples: [&[u8]; 4] = [&[1, 2, 3], &[0, 0, 0], &[0xff, 0x00, 0xfe, 0x00], &[]];
    for bytes in samples {
        assert_eq!(round_trip_blob(&conn, bytes).as_deref(), Some(bytes));
    }
}

#[test]
fn test_empty_blob_is_not_null() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT typeof(?1), length(?1)").unwrap();
    stmt.bind_blob(1, &[]).unwrap();
    stmt.step().unwrap();

    assert_eq!(stmt.column_text(0).unwrap().as_deref(), Some("blob"));
    assert_eq!(stmt.column_int(1).unwrap(), 0);
}

#[test]
fn test_large_blob() {
    let conn = Connection::open_in_memory().unwrap();
    let bytes: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(round_trip_blob(&conn, &bytes), Some(bytes));
}

#[test]
fn test_bind_null_reports_null_type() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT ?1").unwrap();
    stmt.bind_null(1).unwrap();
    stmt.step().unwrap();

    assert_eq!(stmt.column_type(0).unwrap(), ColumnType::Null);
    assert_eq!(stmt.column_text(0).unwrap(), None);
    assert_eq!(stmt.column_blob(0).unwrap(), None);
    assert_eq!(stmt.column_value(0).unwrap(), Value::Null);
}

#[test]
fn test_unbound_parameter_is_null() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT ?1").unwrap();
    stmt.step().unwrap();
    assert_eq!(stmt.column_type(0).unwrap(), ColumnType::Null);
}

#[test]
fn test_numeric_values() {
    let conn = Connection::open_in_memory().unwrap();
    let mut stmt = conn.prepare("SELECT ?1, ?2, ?3").unwrap();
    stmt.bind_int64(1, i64::MAX).unwrap();
    stmt.bind_double(2, 2.5).unwrap();
    stmt.bind_int(3, -7).unwrap();
    stmt.step().unwrap();

    assert_eq!(stmt.column_int64(0).unwrap(), i64::MAX);
    assert_eq!(stmt.column_double(1).unwrap(), 2.5);
    assert_eq!(stmt.column_int(2).unwrap(), -7);
    assert_eq!(stmt.column_type(1).unwrap(), ColumnType::Float);
}

#[test]
fn test_bind_value_round_trip() {
    let conn = Connection::open_in_memory().unwrap();
    let values = [
        Value::Null,
        Value::Integer(-42),
        Value::Real(0.125),
        Value::Text("ünïcode".to_string()),
        Value::Blob(vec![0, 1, 2]),
    ];

    for value in &values {
        let mut stmt = conn.prepare("SELECT ?1").unwrap();
        stmt.bind_value(1, value).unwrap();
        stmt.step().unwrap();
        assert_eq!(&stmt.column_value(0).unwrap(), value);
    }
}

#[test]
fn test_stored_values_survive_table_round_trip() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE kv(k TEXT, v BLOB)").unwrap();

    let mut insert = conn.prepare("INSERT INTO kv VALUES (?, ?)").unwrap();
    insert.bind_text(1, "clé").unwrap();
    insert.bind_blob(2, b"\x00payload\x00").unwrap();
    insert.step().unwrap();
    insert.finalize().unwrap();

    let mut select = conn.prepare("SELECT k, v FROM kv").unwrap();
    select.step().unwrap();
    assert_eq!(select.column_text(0).unwrap().as_deref(), Some("clé"));
    assert_eq!(select.column_blob(1).unwrap().as_deref(), Some(&b"\x00payload\x00"[..]));
}

#[test]
fn test_interior_nul_in_sql_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    let err = conn.prepare("SELECT 1\0; DROP TABLE t").unwrap_err();
    assert!(matches!(err, sqlbind::BindError::Infrastructure(_)));
}
