//! Analysis and plan types produced by the optimizer.

use std::fmt;

use serde::Serialize;

/// Severity of an optimization suggestion.
///
/// Ordered from lowest to highest; the highest severity found decides the
/// CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSeverity {
    Low,
    Medium,
    High
}

impl SuggestionSeverity {
    /// Weight used for the optimization score
    pub fn weight(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3
        }
    }
}

impl fmt::Display for SuggestionSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH")
        }
    }
}

/// Anti-pattern a suggestion refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    SelectStar,
    MissingWhere,
    LeadingWildcard,
    OrderWithoutLimit,
    ComplexJoins,
    LargeOffset,
    UnionWithoutAll,
    Unparseable
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectStar => "select_star",
            Self::MissingWhere => "missing_where",
            Self::LeadingWildcard => "leading_wildcard",
            Self::OrderWithoutLimit => "order_without_limit",
            Self::ComplexJoins => "complex_joins",
            Self::LargeOffset => "large_offset",
            Self::UnionWithoutAll => "union_without_all",
            Self::Unparseable => "unparseable"
        }
    }
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding of the static analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind:       SuggestionKind,
    pub severity:   SuggestionSeverity,
    pub message:    String,
    pub suggestion: String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High
}

impl Complexity {
    /// Bucket a weighted complexity score
    pub fn from_score(score: usize) -> Self {
        match score {
            0..=3 => Self::Low,
            4..=8 => Self::Medium,
            _ => Self::High
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high")
        }
    }
}

/// Result of [`analyze_query`](super::QueryOptimizer::analyze_query)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub query:                String,
    pub suggestions:          Vec<Suggestion>,
    /// Highest suggestion weight, 0 when nothing was found
    pub optimization_score:   u8,
    pub estimated_complexity: Complexity,
    pub recommended_indexes:  Vec<String>
}

impl QueryAnalysis {
    pub fn max_severity(&self) -> Option<SuggestionSeverity> {
        self.suggestions.iter().map(|s| s.severity).max()
    }
}

/// Rewrite stage of the optimization pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    IndexHint,
    LimitPushDown,
    WhereOptimization,
    JoinOptimization
}

impl OptimizationType {
    /// Estimated gain in percent when the stage changes the query
    pub fn gain(self) -> f64 {
        match self {
            Self::IndexHint => 30.0,
            Self::LimitPushDown => 20.0,
            Self::WhereOptimization => 15.0,
            Self::JoinOptimization => 25.0
        }
    }
}

impl fmt::Display for OptimizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexHint => write!(f, "index_hint"),
            Self::LimitPushDown => write!(f, "limit_push_down"),
            Self::WhereOptimization => write!(f, "where_optimization"),
            Self::JoinOptimization => write!(f, "join_optimization")
        }
    }
}

/// Result of [`optimize_query`](super::QueryOptimizer::optimize_query)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub original_query:    String,
    pub optimized_query:   String,
    pub estimated_cost:    f64,
    /// First stage that changed the query
    pub optimization_type: Option<OptimizationType>,
    /// Every stage that changed the query, in pipeline order
    pub applied:           Vec<OptimizationType>,
    /// Columns an index on which would serve this query
    pub indexes_used:      Vec<String>,
    /// Percent, capped at 80
    pub performance_gain:  f64
}

impl QueryPlan {
    pub fn is_unchanged(&self) -> bool {
        self.original_query == self.optimized_query
    }
}
