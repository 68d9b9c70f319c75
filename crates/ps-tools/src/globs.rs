//! Glob matching for SEARCH filters.
//!
//! The supported surface is `*` (within one path segment), `**` (crossing
//! segments), and `?`. Brace alternation is not part of the surface and is
//! rejected up front. Patterns always use forward slashes.

use glob::{MatchOptions, Pattern};

use ps_core::{PsError, PsResult};

/// A compiled glob, matched with literal path separators so `*` and `?`
/// never cross `/`.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    patterns: Vec<Pattern>,
}

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobFilter {
    pub fn compile(patterns: &[String]) -> PsResult<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            if raw.contains('{') || raw.contains('}') {
                return Err(PsError::Schema(format!(
                    "glob '{raw}': brace alternation is not supported (use *, ** and ?)"
                )));
            }
            let pattern = Pattern::new(raw)
                .map_err(|err| PsError::Schema(format!("glob '{raw}': {err}")))?;
            compiled.push(pattern);
        }
        Ok(Self { patterns: compiled })
    }

    /// True when no pattern was supplied (match everything) or any
    /// pattern matches the forward-slash relative path.
    pub fn matches(&self, relative: &str) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| pattern.matches_with(relative, OPTIONS))
    }
}
