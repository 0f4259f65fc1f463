use regex::Regex;
use thiserror::Error;

use crate::storage::CandidateItem;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// A single title pattern.
#[derive(Debug, Clone)]
enum Pattern {
    /// Matches when the title contains the string.
    Literal(String),
    /// Matches when the expression is found anywhere in the title.
    Regex(Regex),
}

impl Pattern {
    fn is_match(&self, title: &str) -> bool {
        match self {
            Pattern::Literal(needle) => title.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(title),
        }
    }
}

/// Include/exclude rules of one feed, compiled once per refresh.
///
/// An item is dropped when its title matches any exclude pattern. Otherwise
/// it passes when there are no include patterns or when at least one include
/// pattern matches. Exclusion always wins, and pattern order never matters.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl ContentFilter {
    /// Compile the feed's patterns.
    ///
    /// With `regex == false` every pattern is a literal substring. With
    /// `regex == true` they are regular expressions and the first invalid one
    /// is reported as [`FilterError::InvalidPattern`].
    pub fn new(includes: &[String], excludes: &[String], regex: bool) -> Result<Self, FilterError> {
        Ok(Self {
            includes: compile(includes, regex)?,
            excludes: compile(excludes, regex)?,
        })
    }

    pub fn accepts(&self, title: &str) -> bool {
        if self.excludes.iter().any(|p| p.is_match(title)) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|p| p.is_match(title))
    }

    /// Keep the candidates whose title passes the rules.
    pub fn apply(&self, candidates: Vec<CandidateItem>) -> Vec<CandidateItem> {
        candidates
            .into_iter()
            .filter(|item| self.accepts(&item.title))
            .collect()
    }
}

fn compile(patterns: &[String], regex: bool) -> Result<Vec<Pattern>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            if regex {
                Regex::new(p)
                    .map(Pattern::Regex)
                    .map_err(|source| FilterError::InvalidPattern {
                        pattern: p.clone(),
                        source,
                    })
            } else {
                Ok(Pattern::Literal(p.clone()))
            }
        })
        .collect()
}
