use super::{
    convert::convert_dialect,
    helpers::{calculate_exit_code, create_output_options, read_queries_input},
    types::{AnalyzeParams, CommandOutput}
};
use crate::{
    error::{AppResult, config_error},
    optimizer::{QueryAnalysis, QueryOptimizer},
    output::{StatementReport, format_statement_reports}
};

/// Analyze every statement of the input and render the results.
///
/// Each statement gets its anti-pattern analysis and an optimization plan.
/// The exit code reflects the highest suggestion severity found.
pub fn run_analyze(params: AnalyzeParams) -> AppResult<CommandOutput> {
    let sql = match (params.query, params.file) {
        (Some(query), _) => query,
        (None, Some(path)) => read_queries_input(&path)?,
        (None, None) => return Err(config_error("Either --query or --file is required"))
    };

    let optimizer = QueryOptimizer::with_dialect(convert_dialect(params.dialect));
    let analyses = optimizer.analyze_many(&sql)?;
    if analyses.is_empty() {
        return Err(config_error("No SQL statements found in input"));
    }
    let exit_code = calculate_exit_code(&analyses);

    let reports: Vec<StatementReport> = analyses
        .into_iter()
        .map(|analysis: QueryAnalysis| StatementReport {
            plan: optimizer.optimize_query(&analysis.query),
            analysis
        })
        .collect();
    let opts = create_output_options(params.output_format, params.no_color, params.verbose);
    Ok(CommandOutput {
        exit_code,
        output: format_statement_reports(&reports, &opts)
    })
}
