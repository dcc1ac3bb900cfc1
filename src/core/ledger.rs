//! Durable run ledgers.
//!
//! A run is persisted as a directory holding `run.json` (run metadata,
//! rewritten on status changes) and `spans.jsonl` (append-only, one span per
//! line in sid order). [`MemoryLedger`] keeps the same contract in memory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{Run, Sid, Span};
use crate::evidence::StoreError;

/// A run and its spans as read back from a ledger
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub run: Run,
    pub spans: Vec<Span>,
}

/// Persistence backend for runs and spans
pub trait RunLedger: Send + Sync {
    /// Whether `run_id` has been persisted
    fn contains(&self, run_id: &str) -> Result<bool, StoreError>;

    /// Persist a new run; fails `DuplicateRun` if it already exists
    fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Overwrite the stored run metadata
    fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Append one span to the run's log
    fn append_span(&self, span: &Span) -> Result<(), StoreError>;

    /// Read a run back; fails `RunNotFound` if nothing is stored
    fn load_run(&self, run_id: &str) -> Result<LoadedRun, StoreError>;

    /// Remove a run whose creation did not complete
    fn discard_run(&self, run_id: &str) -> Result<(), StoreError>;
}

/// Run ids double as directory names
pub fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_string()))
    }
}

/// Check a loaded span log: sids `S0..Sn` in order, all owned by the run,
/// every digest matching its text.
pub fn validate_spans(run_id: &str, spans: &[Span]) -> Result<(), StoreError> {
    let corrupt = |reason: String| StoreError::CorruptLedger {
        run_id: run_id.to_string(),
        reason,
    };

    for (position, span) in spans.iter().enumerate() {
        let expected = Sid::new(position as u64);
        if span.sid != expected {
            return Err(corrupt(format!("expected {} but found {}", expected, span.sid)));
        }
        if span.run_id != run_id {
            return Err(corrupt(format!("{} belongs to run {}", span.sid, span.run_id)));
        }
        if !span.verify_digest() {
            return Err(corrupt(format!("digest mismatch for {}", span.sid)));
        }
        if let Some(parent) = span.parent_sid {
            if parent >= span.sid {
                return Err(corrupt(format!("{} derives from later span {}", span.sid, parent)));
            }
        }
    }

    if spans.len() < 2 {
        return Err(corrupt("missing problem/deliverable anchors".to_string()));
    }

    Ok(())
}

/// File-based ledger under a runs directory
pub struct JsonlLedger {
    runs_dir: PathBuf,
}

impl JsonlLedger {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Ledger rooted at the configured runs directory
    pub fn from_config() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id)?;
        Ok(self.runs_dir.join(run_id))
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.run_dir(run_id)?.join("run.json"))
    }

    fn spans_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.run_dir(run_id)?.join("spans.jsonl"))
    }

    /// List persisted run ids (sorted)
    pub fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.path().join("run.json").exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_run_id(name).is_ok() {
                    runs.push(name.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }
}

impl RunLedger for JsonlLedger {
    fn contains(&self, run_id: &str) -> Result<bool, StoreError> {
        Ok(self.run_path(run_id)?.exists())
    }

    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let run_dir = self.run_dir(&run.id)?;
        fs::create_dir_all(&run_dir)?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(run_dir.join("run.json"))
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::DuplicateRun(run.id.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::to_writer_pretty(&mut file, run)?;
        file.flush()?;

        debug!(run_id = %run.id, dir = %run_dir.display(), "Created run directory");
        Ok(())
    }

    fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let run_dir = self.run_dir(&run.id)?;
        if !run_dir.join("run.json").exists() {
            return Err(StoreError::RunNotFound(run.id.clone()));
        }

        // Write-then-rename so readers never see a half-written run.json
        let mut tmp = tempfile::NamedTempFile::new_in(&run_dir)?;
        serde_json::to_writer_pretty(&mut tmp, run)?;
        tmp.flush()?;
        tmp.persist(run_dir.join("run.json"))
            .map_err(|e| StoreError::Io(e.error))?;

        Ok(())
    }

    fn append_span(&self, span: &Span) -> Result<(), StoreError> {
        let path = self.spans_path(&span.run_id)?;
        let json = serde_json::to_string(span)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        file.lock_exclusive()?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        // Lock is released when file is dropped

        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<LoadedRun, StoreError> {
        let run_path = self.run_path(run_id)?;
        if !run_path.exists() {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }

        let run: Run = serde_json::from_reader(BufReader::new(File::open(&run_path)?))?;
        if run.id != run_id {
            return Err(StoreError::CorruptLedger {
                run_id: run_id.to_string(),
                reason: format!("run.json names run {}", run.id),
            });
        }

        let spans_path = self.spans_path(run_id)?;
        let mut spans = Vec::new();
        if spans_path.exists() {
            let reader = BufReader::new(File::open(&spans_path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let span: Span = serde_json::from_str(&line).map_err(|e| StoreError::CorruptLedger {
                    run_id: run_id.to_string(),
                    reason: format!("line {}: {}", line_no + 1, e),
                })?;
                spans.push(span);
            }
        }

        validate_spans(run_id, &spans)?;

        debug!(run_id, spans = spans.len(), "Loaded run from ledger");
        Ok(LoadedRun { run, spans })
    }
    fn discard_run(&self, run_id: &str) -> Result<(), StoreError> {
        let run_dir = self.run_dir(run_id)?;
        match fs::remove_dir_all(&run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(run_id, "Discarded run directory");
        Ok(())
    }
}

/// In-process ledger (tests and ephemeral sessions)
#[derive(Default)]
pub struct MemoryLedger {
    runs: Mutex<HashMap<String, LoadedRun>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spans stored for a run
    pub fn span_count(&self, run_id: &str) -> usize {
        self.runs
            .lock()
            .get(run_id)
            .map(|loaded| loaded.spans.len())
            .unwrap_or(0)
    }
}

impl RunLedger for MemoryLedger {
    fn contains(&self, run_id: &str) -> Result<bool, StoreError> {
        Ok(self.runs.lock().contains_key(run_id))
    }

    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        validate_run_id(&run.id)?;
        let mut runs = self.runs.lock();
        if runs.contains_key(&run.id) {
            return Err(StoreError::DuplicateRun(run.id.clone()));
        }
        runs.insert(
            run.id.clone(),
            LoadedRun {
                run: run.clone(),
                spans: Vec::new(),
            },
        );
        Ok(())
    }

    fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.lock();
        let loaded = runs
            .get_mut(&run.id)
            .ok_or_else(|| StoreError::RunNotFound(run.id.clone()))?;
        loaded.run = run.clone();
        Ok(())
    }

    fn append_span(&self, span: &Span) -> Result<(), StoreError> {
        let mut runs = self.runs.lock();
        let loaded = runs
            .get_mut(&span.run_id)
            .ok_or_else(|| StoreError::RunNotFound(span.run_id.clone()))?;
        loaded.spans.push(span.clone());
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<LoadedRun, StoreError> {
        let loaded = self
            .runs
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        validate_spans(run_id, &loaded.spans)?;
        Ok(loaded)
    }
    fn discard_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.runs.lock().remove(run_id);
        Ok(())
    }
}
