use std::{fmt, time::Duration};

pub use masterror::{AppError, AppResult};

/// Maximum number of characters of a query kept in error messages
pub const ERROR_QUERY_CHARS: usize = 100;

/// Errors raised by the database access layer.
///
/// Cache misses, partial batch failures and threshold alerts are not errors
/// and never show up here.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DbError {
    /// Required configuration is missing or invalid
    Config(String),
    /// The connection manager was never initialized or has been cleaned up
    NotInitialized,
    /// Pool exhausted, connect failure or failed health probe
    Connection(String),
    /// A specific query failed
    QueryExecution { query: String, cause: String },
    /// A pooled operation exceeded the command timeout
    Timeout { query: String, after: Duration },
    /// A value could not be converted to or from its wire representation
    Serialization(String),
    /// A table or column name failed validation
    InvalidIdentifier(String)
}

impl DbError {
    /// Query failure carrying the truncated query text
    pub fn query(query: &str, cause: impl fmt::Display) -> Self {
        Self::QueryExecution {
            query: truncate(query, ERROR_QUERY_CHARS).to_string(),
            cause: cause.to_string()
        }
    }

    /// Timeout carrying the truncated query text
    pub fn timeout(query: &str, after: Duration) -> Self {
        Self::Timeout {
            query: truncate(query, ERROR_QUERY_CHARS).to_string(),
            after
        }
    }

    pub fn connection(message: impl fmt::Display) -> Self {
        Self::Connection(message.to_string())
    }

    /// Whether the failure happened before the query reached the store
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotInitialized)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Database configuration error: {}", msg),
            Self::NotInitialized => {
                write!(f, "Connection manager not initialized. Call initialize() first")
            }
            Self::Connection(msg) => write!(f, "Connection error: {}", msg),
            Self::QueryExecution {
                query,
                cause
            } => write!(f, "Query execution failed: {} (query: {})", cause, query),
            Self::Timeout {
                query,
                after
            } => write!(f, "Query timed out after {:?} (query: {})", after, query),
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::InvalidIdentifier(name) => write!(f, "Invalid SQL identifier '{}'", name)
        }
    }
}

impl std::error::Error for DbError {}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Config(_) | DbError::InvalidIdentifier(_) => {
                AppError::bad_request(err.to_string())
            }
            DbError::Serialization(_) => AppError::internal(err.to_string()),
            _ => AppError::service(err.to_string())
        }
    }
}

/// Cut `text` to at most `max` characters on a char boundary
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text
    }
}

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create query parse error with optional position info
pub fn query_parse_error(message: impl Into<String>) -> AppError {
    let msg = message.into();
    AppError::bad_request(format_sql_error("Query parse error", &msg))
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Format SQL error with position highlighting
pub(crate) fn format_sql_error(prefix: &str, message: &str) -> String {
    // sqlparser format: "... at Line: X, Column: Y" (older releases omit the
    // colon after Column)
    if let Some(pos) = extract_position(message) {
        format!(
            "{} at line {}, column {}:\n  {}",
            prefix, pos.line, pos.column, message
        )
    } else {
        format!("{}:\n  {}", prefix, message)
    }
}

struct SqlPosition {
    line:   usize,
    column: usize
}

fn extract_position(message: &str) -> Option<SqlPosition> {
    let line_marker = "Line: ";
    let col_marker = ", Column";

    let line_start = message.find(line_marker)?;
    let line_num_start = line_start + line_marker.len();
    let col_start = message[line_num_start..].find(col_marker)?;
    let line_str = &message[line_num_start..line_num_start + col_start];

    let rest = &message[line_num_start + col_start + col_marker.len()..];
    let rest = rest.trim_start_matches(':').trim_start();
    let col_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    let (Ok(line), Ok(column)) = (line_str.parse(), rest[..col_end].parse()) else {
        return None;
    };
    Some(SqlPosition { line, column })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn position_with_and_without_colon() {
        let pos = extract_position("Unexpected EOF at Line: 3, Column: 25").unwrap();
        assert_eq!((pos.line, pos.column), (3, 25));
        let pos = extract_position("Unexpected EOF at Line: 1, Column 7").unwrap();
        assert_eq!((pos.line, pos.column), (1, 7));
        assert!(extract_position("no position here").is_none());
    }

    #[test]
    fn query_error_truncates_long_text() {
        let long = "SELECT ".repeat(50);
        match DbError::query(&long, "boom") {
            DbError::QueryExecution {
                query, ..
            } => assert_eq!(query.chars().count(), ERROR_QUERY_CHARS),
            other => panic!("unexpected {other:?}")
        }
    }
}
