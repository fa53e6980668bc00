use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// SQL Query Layer - static query analysis and backing store diagnostics
#[derive(Parser, Debug)]
#[command(name = "sql-query-layer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze SQL statements for anti-patterns and optimization opportunities
    Analyze {
        #[command(flatten)]
        input: QueryInput,

        /// SQL dialect for tokenizing
        #[arg(long, value_enum, default_value = "postgresql")]
        dialect: Dialect,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output_format: Format,

        /// Show estimated plan cost
        #[arg(short, long)]
        verbose: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    },

    /// Connect to the configured database and report its status
    Health {
        /// Path to a configuration file (defaults to the usual locations)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output_format: Format,

        /// Include the slowest queries in text output
        #[arg(short, long)]
        verbose: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    }
}

/// Where the SQL to analyze comes from
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct QueryInput {
    /// SQL text to analyze
    #[arg(short, long)]
    pub query: Option<String>,

    /// Path to a SQL file (use - for stdin)
    #[arg(short, long)]
    pub file: Option<PathBuf>
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Dialect {
    Generic,
    Mysql,
    Postgresql,
    Sqlite,
    Clickhouse
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
