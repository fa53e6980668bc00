//! Best-effort rewrite stages.
//!
//! Only rewrites that preserve semantics for every input are performed.
//! Stages that would need planner statistics (index hints, join order,
//! limit push-down) never change the text.

use super::{profile::QueryProfile, types::OptimizationType};

/// One stage of the rewrite pipeline
pub(crate) trait RewriteStage: Send + Sync {
    fn kind(&self) -> OptimizationType;

    /// Rewritten SQL, or `None` when the stage does not apply
    fn apply(&self, sql: &str, profile: &QueryProfile) -> Option<String>;
}

pub(crate) fn pipeline() -> Vec<Box<dyn RewriteStage>> {
    vec![
        Box::new(Advisory(OptimizationType::LimitPushDown)),
        Box::new(WhereOptimization),
        Box::new(Advisory(OptimizationType::IndexHint)),
        Box::new(Advisory(OptimizationType::JoinOptimization)),
    ]
}

/// Stage without a safe textual rewrite
struct Advisory(OptimizationType);

impl RewriteStage for Advisory {
    fn kind(&self) -> OptimizationType {
        self.0
    }

    fn apply(&self, _sql: &str, _profile: &QueryProfile) -> Option<String> {
        None
    }
}

/// `col LIKE 'literal'` without wildcards becomes `col = 'literal'`,
/// which can use a plain B-tree index
struct WhereOptimization;

impl RewriteStage for WhereOptimization {
    fn kind(&self) -> OptimizationType {
        OptimizationType::WhereOptimization
    }

    fn apply(&self, sql: &str, profile: &QueryProfile) -> Option<String> {
        if profile.literal_likes.is_empty() {
            return None;
        }
        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for &offset in &profile.literal_likes {
            let end = offset + "LIKE".len();
            let keyword = sql.get(offset..end)?;
            if !keyword.eq_ignore_ascii_case("LIKE") {
                return None;
            }
            out.push_str(&sql[last..offset]);
            out.push('=');
            last = end;
        }
        out.push_str(&sql[last..]);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::SqlDialect;

    fn rewrite(sql: &str) -> Option<String> {
        let profile = QueryProfile::build(sql, SqlDialect::PostgreSQL).unwrap();
        WhereOptimization.apply(sql, &profile)
    }

    #[test]
    fn rewrites_every_literal_like() {
        assert_eq!(
            rewrite("SELECT id FROM t WHERE a LIKE 'x' AND b like 'y'").as_deref(),
            Some("SELECT id FROM t WHERE a = 'x' AND b = 'y'")
        );
    }

    #[test]
    fn leaves_patterns_alone() {
        assert_eq!(rewrite("SELECT id FROM t WHERE a LIKE 'x%'"), None);
        assert_eq!(rewrite("SELECT id FROM t WHERE a ILIKE 'x'"), None);
        assert_eq!(rewrite("SELECT id FROM t WHERE note = 'a LIKE b'"), None);
    }
}
