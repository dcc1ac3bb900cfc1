//! Inverted token index over a run's spans.
//!
//! Ranking is deliberately simple: a span scores the number of distinct query
//! tokens it contains. Ties go to the earlier span.

use std::collections::{BTreeSet, HashMap};

use crate::domain::Sid;

/// Lowercase `text` and split it on every non-alphanumeric character.
///
/// Empty tokens are dropped; duplicates are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// token -> sids containing it
#[derive(Debug, Default, Clone)]
pub struct SpanIndex {
    postings: HashMap<String, BTreeSet<Sid>>,
}

impl SpanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a newly appended span
    pub fn insert(&mut self, sid: Sid, text: &str) {
        for token in tokenize(text) {
            self.postings.entry(token).or_default().insert(sid);
        }
    }

    /// Rank spans by distinct query-token overlap.
    ///
    /// Returns `(sid, score)` sorted by score descending then sid ascending,
    /// at most `limit` entries, never a span with score 0.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(Sid, usize)> {
        let tokens: BTreeSet<String> = tokenize(query).into_iter().collect();

        let mut scores: HashMap<Sid, usize> = HashMap::new();
        for token in &tokens {
            if let Some(sids) = self.postings.get(token) {
                for sid in sids {
                    *scores.entry(*sid).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(Sid, usize)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}
