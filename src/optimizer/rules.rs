//! Anti-pattern rules run by [`QueryOptimizer::analyze_query`](super::QueryOptimizer::analyze_query).

use super::{
    profile::{QueryProfile, StatementKind},
    types::{Suggestion, SuggestionKind, SuggestionSeverity}
};

/// Joins above this count are reported
pub const MAX_JOINS: usize = 3;

/// OFFSET values above this are reported
pub const MAX_OFFSET: u64 = 1000;

/// Metadata about a rule
#[derive(Debug, Clone, Copy)]
pub struct RuleInfo {
    pub kind:     SuggestionKind,
    pub severity: SuggestionSeverity
}

/// Stateless check over a [`QueryProfile`].
///
/// Must be `Send + Sync`: statements are analyzed in parallel.
///
/// # Example
///
/// ```
/// use sql_query_layer::optimizer::{
///     QueryProfile, Rule, RuleInfo, Suggestion, SuggestionKind, SuggestionSeverity
/// };
///
/// struct TooManySubqueries;
///
/// impl Rule for TooManySubqueries {
///     fn info(&self) -> RuleInfo {
///         RuleInfo {
///             kind:     SuggestionKind::ComplexJoins,
///             severity: SuggestionSeverity::Medium
///         }
///     }
///
///     fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
///         (profile.subqueries > 2).then(|| {
///             self.suggest("Many nested subqueries", "Rewrite as CTEs or joins")
///         })
///     }
/// }
/// ```
pub trait Rule: Send + Sync {
    fn info(&self) -> RuleInfo;

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion>;

    /// Build a suggestion carrying this rule's kind and severity
    fn suggest(&self, message: &str, suggestion: &str) -> Suggestion {
        let info = self.info();
        Suggestion {
            kind:       info.kind,
            severity:   info.severity,
            message:    message.to_string(),
            suggestion: suggestion.to_string()
        }
    }
}

/// Every built-in rule, in reporting order
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(SelectStar),
        Box::new(MissingWhere),
        Box::new(LeadingWildcard),
        Box::new(OrderWithoutLimit),
        Box::new(ComplexJoins),
        Box::new(LargeOffset),
        Box::new(UnionWithoutAll),
    ]
}

/// Unqualified `SELECT *`
pub struct SelectStar;

impl Rule for SelectStar {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::SelectStar,
            severity: SuggestionSeverity::Medium
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        profile.select_star.then(|| {
            self.suggest(
                "Avoid SELECT * - specify only needed columns",
                "List explicit columns to reduce data transfer and keep covering indexes usable"
            )
        })
    }
}

/// UPDATE or DELETE without WHERE touches every row
pub struct MissingWhere;

impl Rule for MissingWhere {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::MissingWhere,
            severity: SuggestionSeverity::High
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        let mutating = matches!(
            profile.statement,
            StatementKind::Update | StatementKind::Delete
        );
        (mutating && !profile.has_where).then(|| {
            self.suggest(
                "UPDATE/DELETE without WHERE clause affects all rows",
                "Add a WHERE clause or confirm that the full-table change is intended"
            )
        })
    }
}

/// `LIKE '%...'` cannot use a B-tree index
pub struct LeadingWildcard;

impl Rule for LeadingWildcard {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::LeadingWildcard,
            severity: SuggestionSeverity::Medium
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        profile.leading_wildcard.then(|| {
            self.suggest(
                "Leading wildcard in LIKE prevents index usage",
                "Use full-text search or a trigram index"
            )
        })
    }
}

/// ORDER BY on the outer query without LIMIT sorts the full result
pub struct OrderWithoutLimit;

impl Rule for OrderWithoutLimit {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::OrderWithoutLimit,
            severity: SuggestionSeverity::Low
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        (profile.has_order_by && !profile.has_limit).then(|| {
            self.suggest(
                "ORDER BY without LIMIT sorts the entire result set",
                "Add LIMIT when only the first rows are consumed"
            )
        })
    }
}

pub struct ComplexJoins;

impl Rule for ComplexJoins {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::ComplexJoins,
            severity: SuggestionSeverity::Medium
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        (profile.joins > MAX_JOINS).then(|| {
            self.suggest(
                &format!("Query joins {} tables", profile.joins + 1),
                "Consider denormalizing, splitting the query or a materialized view"
            )
        })
    }
}

/// Deep OFFSET scans and discards every skipped row
pub struct LargeOffset;

impl Rule for LargeOffset {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::LargeOffset,
            severity: SuggestionSeverity::Medium
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        let offset = profile.offset.filter(|&o| o > MAX_OFFSET)?;
        Some(self.suggest(
            &format!("OFFSET {} scans and discards skipped rows", offset),
            "Use keyset pagination (WHERE id > last_seen_id) instead"
        ))
    }
}

/// UNION deduplicates; UNION ALL does not
pub struct UnionWithoutAll;

impl Rule for UnionWithoutAll {
    fn info(&self) -> RuleInfo {
        RuleInfo {
            kind:     SuggestionKind::UnionWithoutAll,
            severity: SuggestionSeverity::Low
        }
    }

    fn check(&self, profile: &QueryProfile) -> Option<Suggestion> {
        (profile.unions_without_all > 0).then(|| {
            self.suggest(
                "UNION removes duplicates with an extra sort",
                "Use UNION ALL when duplicates are impossible or acceptable"
            )
        })
    }
}
