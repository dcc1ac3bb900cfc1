//! Claim splitting.
//!
//! [`ClaimSplitter::split`] returns a lazy, cloneable iterator so callers can
//! walk the same text more than once (count first, then consume) without
//! re-running the heuristics by hand.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tokens that end in '.' without ending a sentence
const ABBREVIATIONS: &[&str] = &[
    "al", "approx", "cf", "corp", "dept", "dr", "eg", "etc", "fig", "ie", "inc", "jr", "ltd", "mr",
    "mrs", "ms", "mt", "prof", "sr", "vol", "vs",
];

/// Closing characters allowed between terminal punctuation and the break
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}'];

/// How answers are cut into claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Sentence boundaries, abbreviation-aware
    #[default]
    Sentences,

    /// One claim per non-empty line
    Lines,
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sentences" | "sentence" => Ok(SplitMode::Sentences),
            "lines" | "line" => Ok(SplitMode::Lines),
            other => Err(format!("unknown claim split mode: {}", other)),
        }
    }
}

/// Splits text into trimmed, non-empty claim strings
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimSplitter {
    mode: SplitMode,
}

impl ClaimSplitter {
    pub fn new(mode: SplitMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    pub fn split<'a>(&self, text: &'a str) -> Claims<'a> {
        Claims {
            rest: text,
            mode: self.mode,
        }
    }
}

/// Iterator over the claims of one text
#[derive(Debug, Clone)]
pub struct Claims<'a> {
    rest: &'a str,
    mode: SplitMode,
}

impl<'a> Iterator for Claims<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let (piece, rest) = match self.mode {
                SplitMode::Sentences => self.rest.split_at(sentence_end(self.rest)),
                SplitMode::Lines => match self.rest.find('\n') {
                    Some(pos) => (&self.rest[..pos], &self.rest[pos + 1..]),
                    None => (self.rest, ""),
                },
            };
            self.rest = rest;

            let claim = piece.trim();
            if !claim.is_empty() {
                return Some(claim);
            }
        }
        None
    }
}

/// Byte offset just past the first sentence in `text` (or `text.len()`)
fn sentence_end(text: &str) -> usize {
    let mut chars = text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }

        // Runs like "?!" or "..." end together
        let mut end = pos + c.len_utf8();
        while let Some(&(next_pos, next)) = chars.peek() {
            if matches!(next, '.' | '!' | '?') || CLOSERS.contains(&next) {
                end = next_pos + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let at_break = text[end..].chars().next().map_or(true, char::is_whitespace);
        if !at_break {
            continue;
        }

        if c == '.' && is_abbreviation(&text[..pos]) {
            continue;
        }

        return end;
    }

    text.len()
}

/// Whether the word right before a '.' looks like an abbreviation
fn is_abbreviation(before: &str) -> bool {
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|c: char| matches!(c, '(' | '[' | '"' | '\'' | '\u{201c}'));

    if word.is_empty() {
        return false;
    }

    let mut letters = word.chars();
    // Initials only; "is a." still ends a sentence
    if let (Some(first), None) = (letters.next(), letters.next()) {
        return first.is_uppercase();
    }

    // Dotted forms such as "e.g" or "U.S" (but not "1.5s")
    if word.contains('.') {
        return word
            .split('.')
            .all(|part| !part.is_empty() && part.len() <= 3 && part.chars().all(char::is_alphabetic));
    }

    ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(text: &str) -> Vec<&str> {
        ClaimSplitter::default().split(text).collect()
    }

    #[test]
    fn test_basic_sentences() {
        assert_eq!(
            sentences("The cache is warm. Latency fell! Was it the index?"),
            vec!["The cache is warm.", "Latency fell!", "Was it the index?"]
        );
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        assert_eq!(
            sentences("Use a store, e.g. Postgres. Dr. Smith agreed."),
            vec!["Use a store, e.g. Postgres.", "Dr. Smith agreed."]
        );
        assert_eq!(sentences("Rust vs. Go is moot. Done."), vec!["Rust vs. Go is moot.", "Done."]);
        assert_eq!(sentences("Made in the U.S. today."), vec!["Made in the U.S. today."]);
        assert_eq!(sentences("Signed by J. Doe. Filed."), vec!["Signed by J. Doe.", "Filed."]);
    }

    #[test]
    fn test_ordinary_words_end_sentences() {
        assert_eq!(
            sentences("The answer is no. The cache was cold [S2]."),
            vec!["The answer is no.", "The cache was cold [S2]."]
        );
        assert_eq!(
            sentences("Pick option a. It is faster. Then rest."),
            vec!["Pick option a.", "It is faster.", "Then rest."]
        );
    }

    #[test]
    fn test_decimals_and_closers() {
        assert_eq!(sentences("p95 is 1.5s. Good."), vec!["p95 is 1.5s.", "Good."]);
        assert_eq!(
            sentences("He said \"done.\" Then left."),
            vec!["He said \"done.\"", "Then left."]
        );
        assert_eq!(sentences("Wait?! Yes."), vec!["Wait?!", "Yes."]);
    }

    #[test]
    fn test_citations_stay_with_following_text() {
        assert_eq!(
            sentences("Latency fell [S2]. Throughput rose [S3]."),
            vec!["Latency fell [S2].", "Throughput rose [S3]."]
        );
    }

    #[test]
    fn test_trailing_text_without_punctuation() {
        assert_eq!(sentences("One. two"), vec!["One.", "two"]);
        assert!(sentences("   ").is_empty());
    }

    #[test]
    fn test_lines_mode() {
        let splitter = ClaimSplitter::new(SplitMode::Lines);
        let claims: Vec<&str> = splitter.split("- first. still first\n\n  second  \r\nthird").collect();
        assert_eq!(claims, vec!["- first. still first", "second", "third"]);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let claims = ClaimSplitter::default().split("A one. B two. C three.");
        assert_eq!(claims.clone().count(), 3);
        assert_eq!(claims.collect::<Vec<_>>().len(), 3);
    }

    #[test]
    fn test_split_mode_parse() {
        assert_eq!("lines".parse::<SplitMode>().unwrap(), SplitMode::Lines);
        assert_eq!("Sentences".parse::<SplitMode>().unwrap(), SplitMode::Sentences);
        assert!("words".parse::<SplitMode>().is_err());
    }
}
