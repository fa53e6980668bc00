//! Parameters and results of CLI commands.

use std::path::PathBuf;

use crate::cli::{Dialect, Format};

/// Parameters for the analyze command.
///
/// Exactly one of `query` and `file` is expected; `query` wins when both
/// are set.
#[derive(Debug, Clone)]
pub struct AnalyzeParams {
    /// Inline SQL text
    pub query:         Option<String>,
    /// SQL file path, `-` for stdin
    pub file:          Option<PathBuf>,
    pub dialect:       Dialect,
    pub output_format: Format,
    pub verbose:       bool,
    pub no_color:      bool
}

/// Parameters for the health command
#[derive(Debug, Clone)]
pub struct HealthParams {
    /// Explicit configuration file; the usual lookup applies otherwise
    pub config:        Option<PathBuf>,
    pub output_format: Format,
    pub verbose:       bool,
    pub no_color:      bool
}

/// Rendered command output and the process exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output:    String
}
