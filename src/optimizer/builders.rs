//! Statement builders for common access patterns.
//!
//! Every value travels as a bind parameter; table and column names go
//! through [`quote_identifier`].

use tracing::warn;

use crate::{
    batch::quote_identifier,
    db::{BatchStatement, SqlValue},
    error::DbError
};

/// Offset above which keyset pagination should replace `OFFSET`
pub const LARGE_PAGINATION_OFFSET: u64 = 10_000;

/// Minimum term length (characters) for full-text search
const FULLTEXT_MIN_TERM_CHARS: usize = 4;

const NAMED_PARAM_PREFIX: &str = ":param_";

/// Append `LIMIT`/`OFFSET` to `base` as two extra bind parameters.
///
/// Large offsets are logged since the store still scans every skipped row.
pub fn paginate_query(base: BatchStatement, offset: u64, limit: u64) -> BatchStatement {
    if offset > LARGE_PAGINATION_OFFSET {
        warn!(
            offset,
            "Large offset detected - consider cursor-based pagination"
        );
    }
    let BatchStatement {
        sql,
        mut params
    } = base;
    let sql = sql.trim_end().trim_end_matches(';').trim_end();
    let sql = format!(
        "{} LIMIT ${} OFFSET ${}",
        sql,
        params.len() + 1,
        params.len() + 2
    );
    params.push(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
    params.push(SqlValue::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
    BatchStatement::new(sql, params)
}

/// Search `columns` of `table` for `term`.
///
/// Terms longer than three characters use English full-text search when
/// `use_fulltext` is set; anything else becomes a case-insensitive
/// substring match over every column. The term is always bound as `$1`.
pub fn build_search_query(
    table: &str,
    columns: &[&str],
    term: &str,
    use_fulltext: bool
) -> Result<BatchStatement, DbError> {
    let table = quote_identifier(table)?;
    if columns.is_empty() {
        return Err(DbError::Config("search needs at least one column".into()));
    }
    let columns = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>, _>>()?;

    if use_fulltext && term.chars().count() >= FULLTEXT_MIN_TERM_CHARS {
        let document = match columns.as_slice() {
            [single] => single.clone(),
            many => format!("concat_ws(' ', {})", many.join(", "))
        };
        let sql = format!(
            "SELECT * FROM {} WHERE to_tsvector('english', {}) @@ plainto_tsquery('english', $1)",
            table, document
        );
        return Ok(BatchStatement::new(sql, vec![SqlValue::from(term)]));
    }

    let conditions = columns
        .iter()
        .map(|c| format!("{} ILIKE $1", c))
        .collect::<Vec<_>>();
    let sql = format!("SELECT * FROM {} WHERE {}", table, conditions.join(" OR "));
    let pattern = format!("%{}%", escape_like(term));
    Ok(BatchStatement::new(sql, vec![SqlValue::from(pattern)]))
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Turn `:param_0`, `:param_1`, ... into `$1`, `$2`, ... and bind `params`
/// in that order.
///
/// Placeholders inside quoted literals and identifiers are left alone. A
/// placeholder whose index has no value fails with [`DbError::Config`].
pub fn prepare_named_query(sql: &str, params: Vec<SqlValue>) -> Result<BatchStatement, DbError> {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut rest = sql;

    while let Some(c) = rest.chars().next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else if c == '\'' || c == '"' {
            quote = Some(c);
        } else if let Some(tail) = rest.strip_prefix(NAMED_PARAM_PREFIX)
            && !out.ends_with(':')
        {
            let digits = tail
                .find(|d: char| !d.is_ascii_digit())
                .unwrap_or(tail.len());
            if digits > 0 {
                let index: usize = tail[..digits].parse().map_err(|_| {
                    DbError::Config(format!("invalid placeholder index '{}'", &tail[..digits]))
                })?;
                if index >= params.len() {
                    return Err(DbError::Config(format!(
                        "placeholder :param_{} has no value ({} given)",
                        index,
                        params.len()
                    )));
                }
                out.push('$');
                out.push_str(&(index + 1).to_string());
                rest = &tail[digits..];
                continue;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Ok(BatchStatement::new(out, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
