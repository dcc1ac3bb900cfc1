//! Run lifecycle.
//!
//! [`RunRegistry`] owns the resident span stores and the ledger behind them.
//! [`Session`] adds the "active run" convenience on top: every operation takes
//! an optional run id and falls back to the session's active run.
//!
//! The fallback is meant for a single caller. Concurrent callers sharing one
//! session should always pass explicit run ids.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use super::ledger::{MemoryLedger, RunLedger};
use crate::domain::{generate_run_id, EvidenceText, RunStatus, Sid, Span, SpanMeta, SpanSummary};
use crate::evidence::{DistillOptions, FsPolicy, SearchHit, SpanStore, StoreError};

/// Resident runs keyed by id
pub struct RunRegistry {
    runs: RwLock<HashMap<String, Arc<SpanStore>>>,
    ledger: Arc<dyn RunLedger>,
}

impl RunRegistry {
    pub fn new(ledger: Arc<dyn RunLedger>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            ledger,
        }
    }

    /// Registry backed by a [`MemoryLedger`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedger::new()))
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Create a run with its problem and deliverable anchors
    #[instrument(skip(self, problem, deliverable))]
    pub fn start_run(
        &self,
        problem: &str,
        deliverable: &str,
        run_id: Option<&str>,
    ) -> Result<Arc<SpanStore>, StoreError> {
        let run_id = run_id.map(str::to_string).unwrap_or_else(generate_run_id);

        let mut runs = self.runs.write();
        if runs.contains_key(&run_id) || self.ledger.contains(&run_id)? {
            return Err(StoreError::DuplicateRun(run_id));
        }

        let store = Arc::new(SpanStore::create(
            Arc::clone(&self.ledger),
            run_id.clone(),
            problem,
            deliverable,
        )?);
        runs.insert(run_id.clone(), Arc::clone(&store));

        info!(%run_id, "Started run");
        Ok(store)
    }

    /// Make a persisted run resident (no-op for resident runs)
    #[instrument(skip(self))]
    pub fn load_run(&self, run_id: &str) -> Result<Arc<SpanStore>, StoreError> {
        if let Some(store) = self.runs.read().get(run_id) {
            return Ok(Arc::clone(store));
        }

        let loaded = self.ledger.load_run(run_id)?;
        let store = Arc::new(SpanStore::restore(Arc::clone(&self.ledger), loaded));

        // Another caller may have loaded it meanwhile; keep the first one
        let store = Arc::clone(
            self.runs
                .write()
                .entry(run_id.to_string())
                .or_insert(store),
        );

        info!(run_id, spans = store.len(), "Loaded run");
        Ok(store)
    }

    /// Resident or loadable run
    pub fn get(&self, run_id: &str) -> Result<Arc<SpanStore>, StoreError> {
        self.load_run(run_id)
    }
}

/// Registry view with an active-run pointer
pub struct Session {
    registry: Arc<RunRegistry>,
    active: RwLock<Option<String>>,
}

fn parse_sid(sid: &str) -> Result<Sid, StoreError> {
    sid.parse()
        .map_err(|_| StoreError::SpanNotFound(sid.to_string()))
}

impl Session {
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self {
            registry,
            active: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn active_run_id(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Store for `run_id`, or for the active run when `None`
    pub fn resolve(&self, run_id: Option<&str>) -> Result<Arc<SpanStore>, StoreError> {
        match run_id {
            Some(id) => self.registry.get(id),
            None => {
                let active = self.active_run_id().ok_or(StoreError::NoActiveRun)?;
                self.registry.get(&active)
            }
        }
    }

    fn activate(&self, store: &SpanStore) -> Result<(), StoreError> {
        let run_id = store.run_id();
        store.set_status(RunStatus::Active)?;

        let previous = self.active.write().replace(run_id.clone());
        if let Some(previous) = previous.filter(|p| *p != run_id) {
            match self.registry.get(&previous) {
                Ok(prev_store) => prev_store.set_status(RunStatus::Archived)?,
                Err(e) => warn!(run_id = %previous, error = %e, "Could not archive previous run"),
            }
            info!(run_id = %previous, "Archived run");
        }
        Ok(())
    }

    /// Create a run and make it active
    pub fn start_run(
        &self,
        problem: &str,
        deliverable: &str,
        run_id: Option<&str>,
    ) -> Result<Arc<SpanStore>, StoreError> {
        let store = self.registry.start_run(problem, deliverable, run_id)?;
        self.activate(&store)?;
        Ok(store)
    }

    /// Load a persisted run and make it active
    pub fn load_run(&self, run_id: &str) -> Result<Arc<SpanStore>, StoreError> {
        let store = self.registry.load_run(run_id)?;
        self.activate(&store)?;
        Ok(store)
    }

    pub fn get_deliverable(&self, run_id: Option<&str>) -> Result<Arc<Span>, StoreError> {
        self.resolve(run_id)?.deliverable()
    }

    pub fn add_span(
        &self,
        text: &str,
        source: Option<String>,
        meta: Option<SpanMeta>,
        run_id: Option<&str>,
    ) -> Result<Arc<Span>, StoreError> {
        self.resolve(run_id)?.add_span(text, source, meta)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_file_span(
        &self,
        policy: &dyn FsPolicy,
        path: &Path,
        start_line: usize,
        end_line: usize,
        source: Option<String>,
        meta: Option<SpanMeta>,
        run_id: Option<&str>,
    ) -> Result<Arc<Span>, StoreError> {
        self.resolve(run_id)?
            .add_file_span(policy, path, start_line, end_line, source, meta)
    }

    pub fn get_span(&self, sid: &str, run_id: Option<&str>) -> Result<Arc<Span>, StoreError> {
        let store = self.resolve(run_id)?;
        store.get_span(parse_sid(sid)?)
    }

    pub fn list_spans(
        &self,
        limit: Option<usize>,
        run_id: Option<&str>,
    ) -> Result<Vec<SpanSummary>, StoreError> {
        Ok(self.resolve(run_id)?.list_spans(limit))
    }

    pub fn search_spans(
        &self,
        query: &str,
        limit: Option<usize>,
        run_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self.resolve(run_id)?.search_spans(query, limit))
    }

    pub fn distill_span(
        &self,
        parent: &str,
        pattern: &str,
        options: DistillOptions,
        run_id: Option<&str>,
    ) -> Result<Arc<Span>, StoreError> {
        let store = self.resolve(run_id)?;
        store.distill_regex(parse_sid(parent)?, pattern, options)
    }

    /// All spans of a run, ready to hand to the verifier
    pub fn evidence(&self, run_id: Option<&str>) -> Result<Vec<EvidenceText>, StoreError> {
        Ok(self.resolve(run_id)?.evidence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Arc::new(RunRegistry::in_memory()))
    }

    #[test]
    fn test_no_active_run() {
        let session = session();
        assert!(matches!(
            session.add_span("x", None, None, None),
            Err(StoreError::NoActiveRun)
        ));
        assert!(matches!(session.get_deliverable(None), Err(StoreError::NoActiveRun)));
    }

    #[test]
    fn test_start_run_sets_active() {
        let session = session();
        let store = session.start_run("problem", "deliverable", Some("r1")).unwrap();
        assert_eq!(session.active_run_id().as_deref(), Some("r1"));
        assert_eq!(store.run_id(), "r1");

        let span = session.add_span("X", None, None, None).unwrap();
        assert_eq!(span.sid, Sid::new(2));
        assert_eq!(session.get_deliverable(None).unwrap().text, "deliverable");
    }

    #[test]
    fn test_new_run_archives_previous() {
        let session = session();
        let first = session.start_run("p1", "d1", Some("first")).unwrap();
        let second = session.start_run("p2", "d2", Some("second")).unwrap();

        assert_eq!(first.run().status, RunStatus::Archived);
        assert_eq!(second.run().status, RunStatus::Active);

        // Archived runs stay readable by id
        assert_eq!(session.get_deliverable(Some("first")).unwrap().text, "d1");
    }

    #[test]
    fn test_duplicate_run_id() {
        let session = session();
        session.start_run("p", "d", Some("same")).unwrap();
        assert!(matches!(
            session.start_run("p", "d", Some("same")),
            Err(StoreError::DuplicateRun(_))
        ));
    }

    #[test]
    fn test_generated_run_id() {
        let session = session();
        let store = session.start_run("p", "d", None).unwrap();
        assert_eq!(store.run_id().len(), 16);
    }

    #[test]
    fn test_unknown_run() {
        let session = session();
        assert!(matches!(session.load_run("missing"), Err(StoreError::RunNotFound(_))));
    }

    #[test]
    fn test_get_span_by_string_id() {
        let session = session();
        session.start_run("problem", "d", Some("r")).unwrap();
        assert_eq!(session.get_span("S0", None).unwrap().text, "problem");
        assert!(matches!(session.get_span("bogus", None), Err(StoreError::SpanNotFound(_))));
        assert!(matches!(session.get_span("S9", None), Err(StoreError::SpanNotFound(_))));
    }

    #[test]
    fn test_sessions_share_registry() {
        let registry = Arc::new(RunRegistry::in_memory());
        let a = Session::new(Arc::clone(&registry));
        let b = Session::new(Arc::clone(&registry));

        a.start_run("p", "d", Some("shared")).unwrap();
        assert!(b.active_run_id().is_none());

        b.add_span("from b", None, None, Some("shared")).unwrap();
        assert_eq!(a.list_spans(None, None).unwrap().len(), 3);
    }
}
