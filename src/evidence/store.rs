//! Per-run append-only span store.
//!
//! Every mutation goes through a single append path, which holds the run's
//! write lock only while it allocates the next sid, writes the ledger, and
//! updates the in-memory log and index. Everything else (file reads, pattern
//! matching, building the text) happens before the lock is taken.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::distill::{matching_lines, DistillOptions, LineMatcher, RegexMatcher};
use super::error::StoreError;
use super::files::FsPolicy;
use super::index::SpanIndex;
use crate::core::ledger::{validate_run_id, LoadedRun, RunLedger};
use crate::domain::{preview, EvidenceText, Run, RunStatus, Sid, Span, SpanMeta, SpanSummary};

/// Default number of entries returned by `list_spans`
pub const DEFAULT_LIST_LIMIT: usize = 200;

/// Default number of hits returned by `search_spans`
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

const SEARCH_PREVIEW_CHARS: usize = 200;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub sid: Sid,

    /// Distinct query tokens found in the span
    pub score: usize,

    pub source: Option<String>,
    pub preview: String,
}

#[derive(Debug)]
struct SpanLog {
    spans: BTreeMap<Sid, Arc<Span>>,
    index: SpanIndex,
    next_sid: Sid,
}

impl SpanLog {
    fn insert(&mut self, span: Arc<Span>) {
        self.index.insert(span.sid, &span.text);
        self.next_sid = span.sid.next();
        self.spans.insert(span.sid, span);
    }
}

impl Default for SpanLog {
    fn default() -> Self {
        Self {
            spans: BTreeMap::new(),
            index: SpanIndex::new(),
            next_sid: Sid::PROBLEM,
        }
    }
}

/// Evidence ledger for a single run
pub struct SpanStore {
    run: RwLock<Run>,
    log: RwLock<SpanLog>,
    ledger: Arc<dyn RunLedger>,
}

impl std::fmt::Debug for SpanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanStore")
            .field("run", &self.run)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl SpanStore {
    /// Create a run and write its problem (S0) and deliverable (S1) anchors
    pub fn create(
        ledger: Arc<dyn RunLedger>,
        run_id: String,
        problem: &str,
        deliverable: &str,
    ) -> Result<Self, StoreError> {
        if problem.trim().is_empty() || deliverable.trim().is_empty() {
            return Err(StoreError::EmptySpan);
        }
        validate_run_id(&run_id)?;

        let run = Run::new(run_id);
        ledger.create_run(&run)?;

        let store = Self {
            run: RwLock::new(run),
            log: RwLock::new(SpanLog::default()),
            ledger,
        };

        // A run without both anchors is unloadable, so it must not stay behind
        if let Err(e) = store.write_anchors(problem, deliverable) {
            let run_id = store.run_id();
            if let Err(discard) = store.ledger.discard_run(&run_id) {
                warn!(run_id = %run_id, error = %discard, "Could not discard incomplete run");
            }
            return Err(e);
        }

        Ok(store)
    }

    fn write_anchors(&self, problem: &str, deliverable: &str) -> Result<(), StoreError> {
        let mut problem_meta = SpanMeta::new();
        problem_meta.insert("kind".to_string(), json!("problem"));
        self.append(problem.to_string(), Some("anchor".to_string()), problem_meta, None)?;

        let mut deliverable_meta = SpanMeta::new();
        deliverable_meta.insert("kind".to_string(), json!("deliverable"));
        deliverable_meta.insert("immutable".to_string(), json!(true));
        self.append(deliverable.to_string(), Some("anchor".to_string()), deliverable_meta, None)?;

        Ok(())
    }

    /// Rebuild a store from a validated ledger read
    pub fn restore(ledger: Arc<dyn RunLedger>, loaded: LoadedRun) -> Self {
        let mut log = SpanLog::default();
        for span in loaded.spans {
            log.insert(Arc::new(span));
        }

        Self {
            run: RwLock::new(loaded.run),
            log: RwLock::new(log),
            ledger,
        }
    }

    pub fn run_id(&self) -> String {
        self.run.read().id.clone()
    }

    /// Snapshot of the run metadata
    pub fn run(&self) -> Run {
        self.run.read().clone()
    }

    /// Persist and apply a status change
    pub fn set_status(&self, status: RunStatus) -> Result<(), StoreError> {
        let mut run = self.run.write();
        if run.status == status {
            return Ok(());
        }
        let mut updated = run.clone();
        updated.status = status;
        self.ledger.update_run(&updated)?;
        *run = updated;
        Ok(())
    }

    /// Number of spans in the run
    pub fn len(&self) -> usize {
        self.log.read().spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(
        &self,
        text: String,
        source: Option<String>,
        meta: SpanMeta,
        parent_sid: Option<Sid>,
    ) -> Result<Arc<Span>, StoreError> {
        let run_id = self.run_id();

        let mut log = self.log.write();
        let sid = log.next_sid;
        let span = Span::new(run_id, sid, text, source, meta, parent_sid);

        // Nothing in memory changes unless the ledger write succeeded
        self.ledger.append_span(&span)?;

        let span = Arc::new(span);
        log.insert(Arc::clone(&span));
        drop(log);

        debug!(run_id = %span.run_id, sid = %span.sid, chars = span.text.len(), "Appended span");
        Ok(span)
    }

    /// Append a free-text span
    #[instrument(skip(self, text, meta), fields(run_id = %self.run_id()))]
    pub fn add_span(
        &self,
        text: &str,
        source: Option<String>,
        meta: Option<SpanMeta>,
    ) -> Result<Arc<Span>, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptySpan);
        }
        self.append(text.to_string(), source, meta.unwrap_or_default(), None)
    }

    /// Append the inclusive 1-based line range of a file as a span
    #[instrument(skip(self, policy, path, meta), fields(run_id = %self.run_id(), path = %path.display()))]
    pub fn add_file_span(
        &self,
        policy: &dyn FsPolicy,
        path: &Path,
        start_line: usize,
        end_line: usize,
        source: Option<String>,
        meta: Option<SpanMeta>,
    ) -> Result<Arc<Span>, StoreError> {
        let out_of_range = |reason: String| StoreError::OutOfRange {
            start: start_line,
            end: end_line,
            reason,
        };

        if start_line == 0 {
            return Err(out_of_range("line numbers start at 1".to_string()));
        }
        if start_line > end_line {
            return Err(out_of_range("start_line is after end_line".to_string()));
        }

        let resolved = policy.resolve(path);
        let decision = policy.is_path_allowed(&resolved);
        if !decision.allowed {
            return Err(StoreError::PathDenied {
                path: resolved.display().to_string(),
                reason: decision.reason,
            });
        }

        let lines = policy.read_lines(&resolved, start_line, end_line)?;
        let requested = end_line - start_line + 1;
        if lines.len() < requested {
            return Err(out_of_range("range extends past end of file".to_string()));
        }

        let mut meta = meta.unwrap_or_default();
        meta.insert("path".to_string(), json!(resolved.display().to_string()));
        meta.insert("start_line".to_string(), json!(start_line));
        meta.insert("end_line".to_string(), json!(end_line));

        let source = source.or_else(|| Some("file".to_string()));
        self.append(lines.concat(), source, meta, None)
    }

    pub fn get_span(&self, sid: Sid) -> Result<Arc<Span>, StoreError> {
        self.log
            .read()
            .spans
            .get(&sid)
            .cloned()
            .ok_or_else(|| StoreError::SpanNotFound(sid.to_string()))
    }

    /// The deliverable anchor (S1)
    pub fn deliverable(&self) -> Result<Arc<Span>, StoreError> {
        let sid = self.run.read().deliverable_sid;
        self.get_span(sid)
    }

    /// Metadata for the most recent `limit` spans, oldest first
    pub fn list_spans(&self, limit: Option<usize>) -> Vec<SpanSummary> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let log = self.log.read();
        let skip = log.spans.len().saturating_sub(limit);
        log.spans.values().skip(skip).map(|span| span.summary()).collect()
    }

    /// Rank spans by distinct token overlap with `query`
    pub fn search_spans(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
        let log = self.log.read();

        log.index
            .search(query, limit)
            .into_iter()
            .filter_map(|(sid, score)| {
                log.spans.get(&sid).map(|span| SearchHit {
                    sid,
                    score,
                    source: span.source.clone(),
                    preview: preview(&span.text, SEARCH_PREVIEW_CHARS),
                })
            })
            .collect()
    }

    /// Derive a span from the lines of `parent` that `matcher` accepts
    #[instrument(skip(self, matcher, options), fields(run_id = %self.run_id(), pattern = matcher.pattern()))]
    pub fn distill_span(
        &self,
        parent: Sid,
        matcher: &dyn LineMatcher,
        options: DistillOptions,
    ) -> Result<Arc<Span>, StoreError> {
        let parent_span = self.get_span(parent)?;
        let max_lines = options.max_lines();

        let lines = matching_lines(&parent_span.text, matcher, max_lines);
        if lines.is_empty() {
            return Err(StoreError::NoMatch {
                parent,
                pattern: matcher.pattern().to_string(),
            });
        }
        let text = lines.join("\n");

        let mut meta = SpanMeta::new();
        meta.insert("pattern".to_string(), json!(matcher.pattern()));
        meta.insert("flags".to_string(), json!(options.flags()));
        meta.insert("max_lines".to_string(), json!(max_lines));

        let source = options.source.clone().or_else(|| Some("distill".to_string()));
        let span = self.append(text, source, meta, Some(parent))?;

        info!(parent = %parent, sid = %span.sid, lines = lines.len(), "Distilled span");
        Ok(span)
    }

    /// `distill_span` with the default regex matcher
    pub fn distill_regex(
        &self,
        parent: Sid,
        pattern: &str,
        options: DistillOptions,
    ) -> Result<Arc<Span>, StoreError> {
        let matcher = RegexMatcher::new(pattern, options.flags())?;
        self.distill_span(parent, &matcher, options)
    }

    /// Export every span as verifier evidence
    pub fn evidence(&self) -> Vec<EvidenceText> {
        self.log
            .read()
            .spans
            .values()
            .map(|span| EvidenceText::new(span.sid, span.text.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::ledger::MemoryLedger;
    use crate::evidence::files::LocalFsPolicy;
    use tempfile::TempDir;

    fn store() -> SpanStore {
        SpanStore::create(
            Arc::new(MemoryLedger::new()),
            "run1".to_string(),
            "Reduce p95 latency",
            "A short report",
        )
        .unwrap()
    }

    #[test]
    fn test_create_writes_anchors() {
        let store = store();
        assert_eq!(store.len(), 2);

        let s0 = store.get_span(Sid::PROBLEM).unwrap();
        assert_eq!(s0.text, "Reduce p95 latency");
        assert_eq!(s0.source.as_deref(), Some("anchor"));
        assert_eq!(s0.meta["kind"], json!("problem"));

        let s1 = store.deliverable().unwrap();
        assert_eq!(s1.sid, Sid::DELIVERABLE);
        assert_eq!(s1.meta["immutable"], json!(true));
    }

    #[test]
    fn test_blank_anchor_rejected() {
        let result = SpanStore::create(Arc::new(MemoryLedger::new()), "r".to_string(), "  ", "d");
        assert!(matches!(result, Err(StoreError::EmptySpan)));
    }

    #[test]
    fn test_sequential_sids() {
        let store = store();
        let x = store.add_span("X", None, None).unwrap();
        let y = store.add_span("Y", None, None).unwrap();
        assert_eq!(x.sid, Sid::new(2));
        assert_eq!(y.sid, Sid::new(3));

        let listed: Vec<Sid> = store.list_spans(None).iter().map(|s| s.sid).collect();
        assert_eq!(listed, vec![Sid::new(0), Sid::new(1), Sid::new(2), Sid::new(3)]);
    }

    #[test]
    fn test_empty_text_rejected() {
        let store = store();
        assert!(matches!(store.add_span("", None, None), Err(StoreError::EmptySpan)));
        assert!(matches!(store.add_span(" \n\t", None, None), Err(StoreError::EmptySpan)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_list_spans_keeps_most_recent() {
        let store = store();
        for n in 0..5 {
            store.add_span(&format!("span {}", n), None, None).unwrap();
        }
        let listed: Vec<Sid> = store.list_spans(Some(2)).iter().map(|s| s.sid).collect();
        assert_eq!(listed, vec![Sid::new(5), Sid::new(6)]);
    }

    #[test]
    fn test_get_missing_span() {
        let store = store();
        assert!(matches!(store.get_span(Sid::new(99)), Err(StoreError::SpanNotFound(_))));
    }

    #[test]
    fn test_search_spans() {
        let store = store();
        store.add_span("Cache hit ratio is 97%", Some("metrics".to_string()), None).unwrap();
        store.add_span("The cache warms in 5 minutes", None, None).unwrap();

        let hits = store.search_spans("cache hit", None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].sid, Sid::new(2));
        assert_eq!(hits[0].score, 2);
        assert_eq!(hits[0].source.as_deref(), Some("metrics"));
        assert_eq!(hits[1].score, 1);

        assert!(store.search_spans("zebra", None).is_empty());
        assert_eq!(store.search_spans("cache", Some(0)).len(), 1);
    }

    #[test]
    fn test_distill_span() {
        let store = store();
        let parent = store
            .add_span("INFO boot\nERROR disk\nINFO ok\nerror net", None, None)
            .unwrap();

        let child = store.distill_regex(parent.sid, "error", DistillOptions::default()).unwrap();
        assert_eq!(child.text, "ERROR disk\nerror net");
        assert_eq!(child.parent_sid, Some(parent.sid));
        assert_eq!(child.source.as_deref(), Some("distill"));
        assert_eq!(child.meta["pattern"], json!("error"));
        assert_eq!(child.meta["flags"], json!("i"));
        assert_eq!(child.meta["max_lines"], json!(200));

        assert_eq!(store.get_span(parent.sid).unwrap().text, parent.text);
    }

    #[test]
    fn test_distill_no_match() {
        let store = store();
        let err = store
            .distill_regex(Sid::PROBLEM, "nothing-here", DistillOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NoMatch { .. }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_distill_missing_parent() {
        let store = store();
        let err = store
            .distill_regex(Sid::new(42), "x", DistillOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::SpanNotFound(_)));
    }

    #[test]
    fn test_add_file_span() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.md");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let store = store();
        let policy = LocalFsPolicy::default();

        let span = store.add_file_span(&policy, &path, 2, 3, None, None).unwrap();
        assert_eq!(span.text, "two\nthree\n");
        assert_eq!(span.source.as_deref(), Some("file"));
        assert_eq!(span.meta["start_line"], json!(2));
        assert_eq!(span.meta["end_line"], json!(3));

        for (start, end) in [(0, 1), (3, 2), (2, 4)] {
            let err = store.add_file_span(&policy, &path, start, end, None, None).unwrap_err();
            assert!(matches!(err, StoreError::OutOfRange { .. }), "{}..{}", start, end);
        }
    }

    #[test]
    fn test_add_file_span_denied() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        std::fs::write(&path, "TOKEN=x\n").unwrap();

        let store = store();
        let err = store
            .add_file_span(&LocalFsPolicy::default(), &path, 1, 1, None, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::PathDenied { .. }));
        assert_eq!(store.len(), 2);
    }

    struct FailingLedger;

    impl RunLedger for FailingLedger {
        fn contains(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn create_run(&self, _: &Run) -> Result<(), StoreError> {
            Ok(())
        }
        fn update_run(&self, _: &Run) -> Result<(), StoreError> {
            Ok(())
        }
        fn append_span(&self, _: &Span) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        fn load_run(&self, run_id: &str) -> Result<LoadedRun, StoreError> {
            Err(StoreError::RunNotFound(run_id.to_string()))
        }
        fn discard_run(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Memory ledger whose span appends fail after `allowed` successes
    struct FlakyLedger {
        inner: MemoryLedger,
        allowed: AtomicUsize,
    }

    impl RunLedger for FlakyLedger {
        fn contains(&self, run_id: &str) -> Result<bool, StoreError> {
            self.inner.contains(run_id)
        }
        fn create_run(&self, run: &Run) -> Result<(), StoreError> {
            self.inner.create_run(run)
        }
        fn update_run(&self, run: &Run) -> Result<(), StoreError> {
            self.inner.update_run(run)
        }
        fn append_span(&self, span: &Span) -> Result<(), StoreError> {
            let remaining = self.allowed.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.allowed.store(remaining - 1, Ordering::SeqCst);
            self.inner.append_span(span)
        }
        fn load_run(&self, run_id: &str) -> Result<LoadedRun, StoreError> {
            self.inner.load_run(run_id)
        }
        fn discard_run(&self, run_id: &str) -> Result<(), StoreError> {
            self.inner.discard_run(run_id)
        }
    }

    #[test]
    fn test_failed_anchor_write_discards_run() {
        let ledger = Arc::new(FlakyLedger {
            inner: MemoryLedger::new(),
            allowed: AtomicUsize::new(1),
        });

        // S0 lands, S1 fails
        let err = SpanStore::create(ledger.clone(), "r".to_string(), "p", "d").unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!ledger.contains("r").unwrap());

        // The id is free again
        ledger.allowed.store(2, Ordering::SeqCst);
        let store = SpanStore::create(ledger.clone(), "r".to_string(), "p", "d").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(ledger.load_run("r").unwrap().spans.len(), 2);
    }

    #[test]
    fn test_failed_append_leaves_state_unchanged() {
        let ledger = Arc::new(MemoryLedger::new());
        let loaded = {
            let store = SpanStore::create(ledger.clone(), "r".to_string(), "p", "d").unwrap();
            store.add_span("kept", None, None).unwrap();
            ledger.load_run(&store.run_id()).unwrap()
        };

        let store = SpanStore::restore(Arc::new(FailingLedger), loaded);
        assert!(store.add_span("lost", None, None).is_err());
        assert_eq!(store.len(), 3);
        assert!(store.search_spans("lost", None).is_empty());

        // Sid counter did not advance
        let store = SpanStore::restore(ledger.clone(), ledger.load_run("r").unwrap());
        assert_eq!(store.add_span("next", None, None).unwrap().sid, Sid::new(3));
    }

    #[test]
    fn test_restore_rebuilds_index() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = SpanStore::create(ledger.clone(), "r".to_string(), "p", "d").unwrap();
        store.add_span("searchable token", None, None).unwrap();

        let restored = SpanStore::restore(ledger.clone(), ledger.load_run("r").unwrap());
        assert_eq!(restored.search_spans("token", None)[0].sid, Sid::new(2));
        assert_eq!(restored.evidence().len(), 3);
    }
}
