use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use super::{
    helpers::create_output_options,
    types::{CommandOutput, HealthParams}
};
use crate::{
    config::Config,
    context::{Database, HealthStatus},
    error::AppResult,
    output::format_status_report
};

/// Connect with the loaded configuration and render a status report.
///
/// A database that cannot be reached is reported as degraded (exit code
/// 1) rather than as an error; only configuration problems fail the
/// command.
pub async fn run_health(params: HealthParams) -> AppResult<CommandOutput> {
    let config = match &params.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env()?;
            config
        }
        None => Config::load()?
    };

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Checking database...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let database = Database::new(config);
    if let Err(e) = database.start().await {
        warn!(error = %e, "Database context failed to start");
    }
    let report = database.status_report().await;
    database.shutdown().await;
    pb.finish_and_clear();

    let opts = create_output_options(params.output_format, params.no_color, params.verbose);
    Ok(CommandOutput {
        exit_code: match report.status {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1
        },
        output:    format_status_report(&report, &opts)
    })
}
