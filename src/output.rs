use colored::Colorize;
use serde::Serialize;

use crate::{
    context::{HealthStatus, StatusReport},
    metrics::AlertLevel,
    optimizer::{Complexity, QueryAnalysis, QueryPlan, SuggestionSeverity}
};

/// Output format for results
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Analysis and plan of one statement
#[derive(Debug, Clone, Serialize)]
pub struct StatementReport {
    #[serde(flatten)]
    pub analysis: QueryAnalysis,
    pub plan:     QueryPlan
}

fn serialize<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => Some(serde_json::to_string_pretty(value).unwrap_or_default()),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value).unwrap_or_default()),
        OutputFormat::Text => None
    }
}

/// Format per-statement analysis results
pub fn format_statement_reports(reports: &[StatementReport], opts: &OutputOptions) -> String {
    if let Some(out) = serialize(reports, opts.format) {
        return out;
    }

    let mut output = String::new();
    for (i, report) in reports.iter().enumerate() {
        let analysis = &report.analysis;
        let header = format!(
            "Query #{} (complexity: {}, score: {}):",
            i + 1,
            complexity_label(analysis.estimated_complexity, opts.colored),
            analysis.optimization_score
        );
        if opts.colored {
            output.push_str(&header.cyan().bold().to_string());
        } else {
            output.push_str(&header);
        }
        output.push('\n');
        output.push_str(&format!("{}\n", analysis.query));

        for s in &analysis.suggestions {
            output.push_str(&format!(
                "  [{}] {}: {}\n",
                severity_label(s.severity, opts.colored),
                s.kind,
                s.message
            ));
            output.push_str(&format!("         -> {}\n", s.suggestion));
        }
        if !analysis.recommended_indexes.is_empty() {
            output.push_str(&format!(
                "  Index candidates: {}\n",
                analysis.recommended_indexes.join(", ")
            ));
        }

        let plan = &report.plan;
        if !plan.is_unchanged() {
            output.push_str(&format!(
                "  Optimized (+{:.0}%): {}\n",
                plan.performance_gain, plan.optimized_query
            ));
        }
        if opts.verbose {
            output.push_str(&format!("  Estimated cost: {:.1}\n", plan.estimated_cost));
        }
        output.push('\n');
    }

    let count = |severity: SuggestionSeverity| {
        reports
            .iter()
            .flat_map(|r| &r.analysis.suggestions)
            .filter(|s| s.severity == severity)
            .count()
    };
    output.push_str(&format!(
        "{} statements: {} high, {} medium, {} low\n",
        reports.len(),
        count(SuggestionSeverity::High),
        count(SuggestionSeverity::Medium),
        count(SuggestionSeverity::Low)
    ));
    output
}

/// Format the combined status report
pub fn format_status_report(report: &StatusReport, opts: &OutputOptions) -> String {
    if let Some(out) = serialize(report, opts.format) {
        return out;
    }

    let mut output = String::new();
    let status = match report.status {
        HealthStatus::Healthy if opts.colored => "HEALTHY".green().bold().to_string(),
        HealthStatus::Degraded if opts.colored => "DEGRADED".red().bold().to_string(),
        HealthStatus::Healthy => "HEALTHY".to_string(),
        HealthStatus::Degraded => "DEGRADED".to_string()
    };
    output.push_str(&format!("Status: {}\n\n", status));

    let db = &report.database;
    output.push_str("Database:\n");
    match (&db.error, db.probe_time) {
        (Some(error), _) => output.push_str(&format!("  Probe failed: {}\n", error)),
        (None, Some(probe)) => output.push_str(&format!("  Probe: {:.3}s\n", probe)),
        (None, None) => {}
    }
    output.push_str(&format!(
        "  Pool: {}/{} connections ({} free)\n",
        db.stats.pool_size, db.stats.pool_max_size, db.stats.pool_free_connections
    ));
    output.push_str(&format!(
        "  Queries: {} total, {} errors, avg {:.3}s\n\n",
        db.stats.total_queries, db.stats.errors, db.stats.avg_query_time
    ));

    let cache = &report.cache;
    output.push_str(&format!(
        "Cache: {}/{} entries, hit rate {:.1}%, {} evictions, {} invalidations\n\n",
        cache.size,
        cache.max_size,
        cache.hit_rate * 100.0,
        cache.evictions,
        cache.invalidations
    ));

    let perf = &report.performance;
    output.push_str(&format!(
        "Recent window: {} queries, avg {:.3}s, error rate {:.1}%\n",
        perf.recent_query_count,
        perf.avg_query_time,
        perf.error_rate * 100.0
    ));
    if opts.verbose {
        for q in &report.top_queries {
            output.push_str(&format!(
                "  {:.3}s avg x{} {}\n",
                q.stats.avg_time, q.stats.count, q.query_preview
            ));
        }
    }

    output.push_str(&format!(
        "\nAlerts: {} unresolved\n",
        report.unresolved_alerts.len()
    ));
    for alert in &report.unresolved_alerts {
        let level = alert.level.to_string();
        let level = match alert.level {
            _ if !opts.colored => level,
            AlertLevel::Info => level.normal().to_string(),
            AlertLevel::Warning => level.yellow().to_string(),
            AlertLevel::Error | AlertLevel::Critical => level.red().to_string()
        };
        output.push_str(&format!(
            "  [{}] {}: {}\n",
            level, alert.metric_name, alert.message
        ));
    }
    output
}

fn complexity_label(complexity: Complexity, colored: bool) -> String {
    let label = complexity.to_string();
    match complexity {
        _ if !colored => label,
        Complexity::Low => label.green().to_string(),
        Complexity::Medium => label.yellow().to_string(),
        Complexity::High => label.red().to_string()
    }
}

fn severity_label(severity: SuggestionSeverity, colored: bool) -> String {
    let label = severity.to_string();
    match severity {
        _ if !colored => label,
        SuggestionSeverity::Low => label.blue().to_string(),
        SuggestionSeverity::Medium => label.yellow().to_string(),
        SuggestionSeverity::High => label.red().bold().to_string()
    }
}
