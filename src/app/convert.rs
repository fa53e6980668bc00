//! CLI-facing enums to internal types.

use crate::{
    cli::{Dialect, Format},
    optimizer::SqlDialect,
    output::OutputFormat
};

/// Converts a CLI dialect to the tokenizer dialect.
///
/// # Example
///
/// ```
/// use sql_query_layer::{app::convert_dialect, cli::Dialect, optimizer::SqlDialect};
///
/// assert_eq!(convert_dialect(Dialect::Mysql), SqlDialect::MySQL);
/// ```
pub fn convert_dialect(dialect: Dialect) -> SqlDialect {
    match dialect {
        Dialect::Generic => SqlDialect::Generic,
        Dialect::Mysql => SqlDialect::MySQL,
        Dialect::Postgresql => SqlDialect::PostgreSQL,
        Dialect::Sqlite => SqlDialect::SQLite,
        Dialect::Clickhouse => SqlDialect::ClickHouse
    }
}

pub fn convert_format(format: Format) -> OutputFormat {
    match format {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
        Format::Yaml => OutputFormat::Yaml
    }
}
