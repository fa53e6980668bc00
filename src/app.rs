//! Application logic for the `sql-query-layer` binary.
//!
//! Kept apart from `main` so commands can be exercised from tests.

mod analyze;
mod convert;
mod health;
mod helpers;
mod types;

pub use analyze::run_analyze;
pub use convert::{convert_dialect, convert_format};
pub use health::run_health;
pub use helpers::{calculate_exit_code, create_output_options, read_queries_input};
pub use types::{AnalyzeParams, CommandOutput, HealthParams};
