// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use std::time::Duration;

use sql_query_layer::error::{
    AppError, DbError, ERROR_QUERY_CHARS, config_error, file_read_error, query_parse_error
};

#[test]
fn test_file_read_error() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error = file_read_error("/path/to/file.sql", io_error);
    assert!(format!("{:?}", error).contains("/path/to/file.sql"));
}

#[test]
fn test_query_parse_error_with_position() {
    let error = query_parse_error("Unterminated string literal at Line: 3, Column: 25");
    assert!(format!("{:?}", error).contains("line 3, column 25"));
}

#[test]
fn test_query_parse_error_without_position() {
    let error = query_parse_error("Unexpected token");
    assert!(format!("{:?}", error).contains("Unexpected token"));
}

#[test]
fn test_config_error() {
    assert!(format!("{:?}", config_error("bad value")).contains("bad value"));
}

#[test]
fn test_query_error_truncates_text() {
    let sql = format!("SELECT {} FROM t", "x".repeat(500));
    let DbError::QueryExecution { query, cause } = DbError::query(&sql, "syntax error") else {
        panic!("expected a query execution error");
    };
    assert_eq!(query.chars().count(), ERROR_QUERY_CHARS);
    assert_eq!(cause, "syntax error");
}

#[test]
fn test_timeout_display() {
    let err = DbError::timeout("SELECT pg_sleep(100)", Duration::from_secs(60));
    let msg = err.to_string();
    assert!(msg.contains("60s"));
    assert!(msg.contains("SELECT pg_sleep(100)"));
    assert!(!err.is_connection());
}

#[test]
fn test_connection_classification() {
    assert!(DbError::NotInitialized.is_connection());
    assert!(DbError::connection("pool exhausted").is_connection());
    assert!(!DbError::Serialization("bad row".into()).is_connection());
    assert!(
        DbError::NotInitialized
            .to_string()
            .contains("not initialized")
    );
}

#[test]
fn test_db_error_converts_to_app_error() {
    let app: AppError = DbError::InvalidIdentifier("a b".into()).into();
    assert!(format!("{:?}", app).contains("a b"));

    let app: AppError = DbError::connection("refused").into();
    assert!(format!("{:?}", app).contains("refused"));
}
