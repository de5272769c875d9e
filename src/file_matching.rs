use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

/// Expression selecting which paths get case-checked. Vendored trees like
/// `node_modules` are the usual exclusions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchExpression {
    /// Matches a Glob (* and ?).
    #[serde(with = "crate::serde_parse")]
    Glob(glob::Pattern),
    /// Matches a regex on the path.
    #[serde(with = "crate::serde_parse")]
    Regex(Regex),
    /// Not operator.
    Not(Box<MatchExpression>),
    /// Or operator.
    Or(Vec<MatchExpression>),
    /// And operator.
    And(Vec<MatchExpression>),
    /// Bool literal.
    Bool(bool),
}

/// Returns true if `path` matches `expr`. Paths that aren't UTF-8 never
/// match a glob or regex.
pub fn path_matches(path: &Path, expr: &MatchExpression) -> bool {
    match expr {
        MatchExpression::Glob(glob_pattern) => path
            .to_str()
            .is_some_and(|path| glob_pattern.matches(path)),
        MatchExpression::Regex(re) => path.to_str().is_some_and(|path| re.is_match(path)),
        MatchExpression::Not(inner) => !path_matches(path, inner),
        MatchExpression::Or(inner) => inner.iter().any(|inner| path_matches(path, inner)),
        MatchExpression::And(inner) => inner.iter().all(|inner| path_matches(path, inner)),
        MatchExpression::Bool(b) => *b,
    }
}

/// Filter `paths` according to the match `expr`, in place.
pub fn retain_matching_paths(paths: &mut Vec<PathBuf>, expr: &MatchExpression) {
    paths.retain(|p| path_matches(p, expr))
}
