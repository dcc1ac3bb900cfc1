//! Line-pattern distillation.
//!
//! Derives a smaller span from a parent by keeping only the lines a
//! [`LineMatcher`] accepts. The matching engine is an implementation detail
//! behind the trait; [`RegexMatcher`] is the default.

use regex::{Regex, RegexBuilder};

use super::error::StoreError;

/// Default cap on distilled lines
pub const DEFAULT_MAX_LINES: usize = 200;

/// Default flags: case-insensitive
pub const DEFAULT_FLAGS: &str = "i";

/// Decides whether a single line is kept
pub trait LineMatcher: Send + Sync {
    fn is_match(&self, line: &str) -> bool;

    /// Pattern description recorded in the derived span's metadata
    fn pattern(&self) -> &str;
}

/// Regex-backed line matcher.
///
/// Flags: `i` case-insensitive, `m` multi-line anchors.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    pattern: String,
}

impl RegexMatcher {
    pub fn new(pattern: &str, flags: &str) -> Result<Self, StoreError> {
        let mut builder = RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                c if c.is_whitespace() => {}
                other => {
                    return Err(StoreError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: format!("unknown flag '{}'", other),
                    })
                }
            }
        }

        let regex = builder.build().map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }
}

impl LineMatcher for RegexMatcher {
    fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Options for `distill_span`
#[derive(Debug, Clone, Default)]
pub struct DistillOptions {
    /// Source label for the new span (default "distill")
    pub source: Option<String>,

    /// Matcher flags (default "i")
    pub flags: Option<String>,

    /// Maximum lines kept (default 200, minimum 1)
    pub max_lines: Option<usize>,
}

impl DistillOptions {
    pub fn flags(&self) -> &str {
        self.flags.as_deref().unwrap_or(DEFAULT_FLAGS)
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines.unwrap_or(DEFAULT_MAX_LINES).max(1)
    }
}

/// Collect up to `max_lines` matching lines of `text` in original order
pub fn matching_lines<'t>(text: &'t str, matcher: &dyn LineMatcher, max_lines: usize) -> Vec<&'t str> {
    text.lines()
        .filter(|line| matcher.is_match(line))
        .take(max_lines)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "INFO start\nERROR disk full\ninfo retry\nerror disk full again\nINFO done";

    #[test]
    fn test_case_insensitive_by_default() {
        let matcher = RegexMatcher::new("error", DEFAULT_FLAGS).unwrap();
        assert_eq!(
            matching_lines(LOG, &matcher, 10),
            vec!["ERROR disk full", "error disk full again"]
        );
    }

    #[test]
    fn test_case_sensitive_without_flag() {
        let matcher = RegexMatcher::new("error", "").unwrap();
        assert_eq!(matching_lines(LOG, &matcher, 10), vec!["error disk full again"]);
    }

    #[test]
    fn test_max_lines_caps_in_order() {
        let matcher = RegexMatcher::new("info", "i").unwrap();
        assert_eq!(matching_lines(LOG, &matcher, 2), vec!["INFO start", "info retry"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RegexMatcher::new("(unclosed", "i").unwrap_err();
        assert!(matches!(err, StoreError::InvalidPattern { .. }));
    }

    #[test]
    fn test_unknown_flag() {
        let err = RegexMatcher::new("x", "iz").unwrap_err();
        assert!(matches!(err, StoreError::InvalidPattern { .. }));
    }

    #[test]
    fn test_options_defaults() {
        let options = DistillOptions::default();
        assert_eq!(options.flags(), "i");
        assert_eq!(options.max_lines(), 200);

        let options = DistillOptions {
            max_lines: Some(0),
            ..Default::default()
        };
        assert_eq!(options.max_lines(), 1);
    }
}
