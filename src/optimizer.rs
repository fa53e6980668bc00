//! Static query analysis and best-effort rewriting.
//!
//! The optimizer is advisory: it never sits on the execution path. It
//! reports anti-patterns with a severity, estimates structural complexity,
//! names columns worth indexing and produces a [`QueryPlan`] from a fixed
//! rewrite pipeline.
//!
//! # Example
//!
//! ```
//! use sql_query_layer::optimizer::{Complexity, QueryOptimizer, SuggestionKind};
//!
//! let optimizer = QueryOptimizer::new();
//! let analysis = optimizer.analyze_query("DELETE FROM sessions");
//!
//! assert_eq!(analysis.optimization_score, 3);
//! assert_eq!(analysis.suggestions[0].kind, SuggestionKind::MissingWhere);
//! assert_eq!(analysis.estimated_complexity, Complexity::Low);
//! ```

mod builders;
mod profile;
mod rewrite;
mod rules;
mod types;

use std::collections::HashMap;

pub use builders::{
    LARGE_PAGINATION_OFFSET, build_search_query, paginate_query, prepare_named_query
};
use parking_lot::RwLock;
pub use profile::{QueryProfile, SqlDialect, StatementKind};
use rayon::prelude::*;
pub use rules::{MAX_JOINS, MAX_OFFSET, Rule, RuleInfo, default_rules};
use tracing::debug;
pub use types::{
    Complexity, OptimizationType, QueryAnalysis, QueryPlan, Suggestion, SuggestionKind,
    SuggestionSeverity
};

use self::rewrite::RewriteStage;
use crate::error::{AppResult, query_parse_error};

/// Maximum number of memoized plans; the memo is reset when full
const PLAN_CACHE_CAPACITY: usize = 1024;

/// Upper bound of the estimated performance gain (percent)
const MAX_GAIN: f64 = 80.0;

/// Rule-based SQL analyzer and rewriter
pub struct QueryOptimizer {
    dialect: SqlDialect,
    rules:   Vec<Box<dyn Rule>>,
    stages:  Vec<Box<dyn RewriteStage>>,
    plans:   RwLock<HashMap<String, QueryPlan>>
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryOptimizer {
    /// Optimizer for the PostgreSQL dialect with every built-in rule
    pub fn new() -> Self {
        Self::with_dialect(SqlDialect::default())
    }

    pub fn with_dialect(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            rules: default_rules(),
            stages: rewrite::pipeline(),
            plans: RwLock::new(HashMap::new())
        }
    }

    /// Add a custom rule after the built-in ones
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Report anti-patterns, complexity and index candidates for one
    /// statement.
    ///
    /// SQL the tokenizer rejects yields a single
    /// [`SuggestionKind::Unparseable`] suggestion instead of an error.
    pub fn analyze_query(&self, sql: &str) -> QueryAnalysis {
        let profile = match QueryProfile::build(sql, self.dialect) {
            Ok(profile) => profile,
            Err(e) => return unparseable(sql, &e)
        };
        let suggestions: Vec<Suggestion> =
            self.rules.iter().filter_map(|r| r.check(&profile)).collect();
        let optimization_score = suggestions
            .iter()
            .map(|s| s.severity.weight())
            .max()
            .unwrap_or(0);

        QueryAnalysis {
            query: sql.to_string(),
            suggestions,
            optimization_score,
            estimated_complexity: Complexity::from_score(profile.complexity_score()),
            recommended_indexes: profile.index_candidates()
        }
    }

    /// Analyze every statement of a semicolon-separated script in parallel.
    ///
    /// Results keep the statement order of the script.
    pub fn analyze_many(&self, script: &str) -> AppResult<Vec<QueryAnalysis>> {
        let statements = profile::split_statements(script, self.dialect)
            .map_err(query_parse_error)?;
        Ok(statements
            .par_iter()
            .map(|sql| self.analyze_query(sql))
            .collect())
    }

    /// Weighted count of joins, subqueries, unions, GROUP BY, ORDER BY and
    /// HAVING, bucketed into [`Complexity`]
    pub fn estimate_complexity(&self, sql: &str) -> Complexity {
        QueryProfile::build(sql, self.dialect)
            .map_or(Complexity::Low, |p| Complexity::from_score(p.complexity_score()))
    }

    /// Run the rewrite pipeline.
    ///
    /// Always returns a plan; when nothing applies the optimized text equals
    /// the original and the gain is zero. Plans are memoized by exact text,
    /// and optimizing an optimized query returns it unchanged.
    pub fn optimize_query(&self, sql: &str) -> QueryPlan {
        if let Some(plan) = self.plans.read().get(sql) {
            return plan.clone();
        }
        let plan = self.plan(sql);

        let mut plans = self.plans.write();
        if plans.len() >= PLAN_CACHE_CAPACITY {
            plans.clear();
        }
        plans.insert(sql.to_string(), plan.clone());
        plan
    }

    /// Number of memoized plans
    pub fn cached_plans(&self) -> usize {
        self.plans.read().len()
    }

    fn plan(&self, sql: &str) -> QueryPlan {
        let Ok(mut profile) = QueryProfile::build(sql, self.dialect) else {
            return QueryPlan {
                original_query:    sql.to_string(),
                optimized_query:   sql.to_string(),
                estimated_cost:    1.0,
                optimization_type: None,
                applied:           Vec::new(),
                indexes_used:      Vec::new(),
                performance_gain:  0.0
            };
        };
        let indexes_used = profile.index_candidates();

        let mut current = sql.to_string();
        let mut applied = Vec::new();
        for stage in &self.stages {
            let Some(rewritten) = stage.apply(&current, &profile) else {
                continue;
            };
            if rewritten == current {
                continue;
            }
            match QueryProfile::build(&rewritten, self.dialect) {
                Ok(next) => {
                    debug!(stage = %stage.kind(), "Rewrote query");
                    profile = next;
                    current = rewritten;
                    applied.push(stage.kind());
                }
                Err(e) => debug!(stage = %stage.kind(), error = %e, "Discarded rewrite")
            }
        }

        let performance_gain = applied
            .iter()
            .map(|t| t.gain())
            .sum::<f64>()
            .min(MAX_GAIN);
        QueryPlan {
            original_query: sql.to_string(),
            estimated_cost: profile.estimated_cost(),
            optimization_type: applied.first().copied(),
            applied,
            indexes_used,
            performance_gain,
            optimized_query: current
        }
    }
}

fn unparseable(sql: &str, error: &str) -> QueryAnalysis {
    QueryAnalysis {
        query:                sql.to_string(),
        suggestions:          vec![Suggestion {
            kind:       SuggestionKind::Unparseable,
            severity:   SuggestionSeverity::Low,
            message:    format!("Query could not be tokenized: {}", error),
            suggestion: "Check the SQL syntax for the selected dialect".to_string()
        }],
        optimization_score:   SuggestionSeverity::Low.weight(),
        estimated_complexity: Complexity::Low,
        recommended_indexes:  Vec::new()
    }
}
