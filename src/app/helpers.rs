//! Helper functions for CLI operations.

use std::{
    fs::read_to_string,
    io::{self, Read},
    path::Path
};

use super::convert::convert_format;
use crate::{
    cli::Format,
    error::{AppResult, file_read_error},
    optimizer::{QueryAnalysis, SuggestionSeverity},
    output::OutputOptions
};

/// Calculates the process exit code from suggestion severities.
///
/// - `0` - no suggestions or only low severity ones
/// - `1` - at least one medium severity suggestion
/// - `2` - at least one high severity suggestion
///
/// # Example
///
/// ```
/// use sql_query_layer::{app::calculate_exit_code, optimizer::QueryOptimizer};
///
/// let optimizer = QueryOptimizer::new();
/// let analyses = vec![optimizer.analyze_query("SELECT id FROM users WHERE id = 1")];
/// assert_eq!(calculate_exit_code(&analyses), 0);
/// ```
pub fn calculate_exit_code(analyses: &[QueryAnalysis]) -> i32 {
    match analyses.iter().filter_map(QueryAnalysis::max_severity).max() {
        Some(SuggestionSeverity::High) => 2,
        Some(SuggestionSeverity::Medium) => 1,
        Some(SuggestionSeverity::Low) | None => 0
    }
}

/// Reads SQL from a file, or from stdin when the path is `-`
pub fn read_queries_input(path: &Path) -> AppResult<String> {
    if path.to_str() == Some("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| file_read_error("stdin", e))?;
        Ok(buffer)
    } else {
        read_to_string(path).map_err(|e| file_read_error(&path.display().to_string(), e))
    }
}

/// Create output options from parameters
pub fn create_output_options(format: Format, no_color: bool, verbose: bool) -> OutputOptions {
    OutputOptions {
        format: convert_format(format),
        colored: !no_color,
        verbose
    }
}
