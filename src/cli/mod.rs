//! Command-line interface for spanproof.
//!
//! Every invocation is a fresh process, so commands other than `start` name
//! their run explicitly with `--run`.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{CommandOracle, ScoringOracle};
use crate::config;
use crate::core::{JsonlLedger, RunRegistry, Session};
use crate::domain::VerificationReport;
use crate::evidence::DistillOptions;
use crate::verify::{AuditRequest, ContextMode, TraceStep, Verifier, VerifyOptions};

/// spanproof - Evidence ledger and citation-grounded claim verification
#[derive(Parser, Debug)]
#[command(name = "spanproof")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `verify` and `audit`
#[derive(clap::Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Scoring oracle command (overrides config `oracle.command`)
    #[arg(long, env = "SPANPROOF_ORACLE")]
    pub oracle: Option<String>,

    /// Default support target in [0, 1]
    #[arg(long)]
    pub target: Option<f64>,

    /// Flag claims without citations instead of scoring them
    #[arg(long)]
    pub require_citations: bool,

    /// Context shown to the oracle: cited, all or auto
    #[arg(long)]
    pub context_mode: Option<ContextMode>,

    /// Model hint passed to the oracle
    #[arg(long)]
    pub model: Option<String>,

    /// Include the exact oracle payload per claim
    #[arg(long)]
    pub include_prompts: bool,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run with a problem statement and deliverable
    Start {
        problem: String,
        deliverable: String,

        /// Explicit run id (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Print a run's deliverable (S1)
    Deliverable {
        #[arg(long)]
        run: String,
    },

    /// Add a text span (reads stdin if TEXT is omitted)
    Add {
        #[arg(long)]
        run: String,

        text: Option<String>,

        #[arg(short, long)]
        source: Option<String>,
    },

    /// Add a line range of a file as a span
    AddFile {
        #[arg(long)]
        run: String,

        path: PathBuf,

        /// First line (1-based)
        #[arg(long)]
        start: usize,

        /// Last line (inclusive)
        #[arg(long)]
        end: usize,

        #[arg(short, long)]
        source: Option<String>,
    },

    /// List spans
    Spans {
        #[arg(long)]
        run: String,

        /// Show only the most recent N spans
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one span
    Show {
        #[arg(long)]
        run: String,

        sid: String,
    },

    /// Search spans by token overlap
    Search {
        #[arg(long)]
        run: String,

        query: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Derive a span from the matching lines of another
    Distill {
        #[arg(long)]
        run: String,

        parent: String,
        pattern: String,

        /// Match flags: i (case-insensitive), m (multi-line)
        #[arg(long)]
        flags: Option<String>,

        #[arg(long)]
        max_lines: Option<usize>,

        #[arg(short, long)]
        source: Option<String>,
    },

    /// Verify a free-text answer against a run's spans (reads stdin if ANSWER is omitted)
    Verify {
        #[arg(long)]
        run: String,

        answer: Option<String>,

        #[arg(long)]
        max_claims: Option<usize>,

        #[command(flatten)]
        options: VerifyArgs,
    },

    /// Verify an explicit JSON claim trace (reads stdin if --steps is omitted)
    Audit {
        #[arg(long)]
        run: String,

        /// JSON file with [{"idx", "claim", "cites", "target"?}, ...]
        #[arg(long)]
        steps: Option<PathBuf>,

        #[command(flatten)]
        options: VerifyArgs,
    },

    /// List persisted runs
    Runs,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Start {
                problem,
                deliverable,
                run_id,
            } => start_run(&problem, &deliverable, run_id.as_deref()),
            Commands::Deliverable { run } => show_deliverable(&run),
            Commands::Add { run, text, source } => add_span(&run, text, source),
            Commands::AddFile {
                run,
                path,
                start,
                end,
                source,
            } => add_file_span(&run, path, start, end, source),
            Commands::Spans { run, limit } => list_spans(&run, limit),
            Commands::Show { run, sid } => show_span(&run, &sid),
            Commands::Search { run, query, limit } => search_spans(&run, &query, limit),
            Commands::Distill {
                run,
                parent,
                pattern,
                flags,
                max_lines,
                source,
            } => distill(
                &run,
                &parent,
                &pattern,
                DistillOptions {
                    source,
                    flags,
                    max_lines,
                },
            ),
            Commands::Verify {
                run,
                answer,
                max_claims,
                options,
            } => verify_answer(&run, answer, max_claims, options).await,
            Commands::Audit { run, steps, options } => audit_trace(&run, steps, options).await,
            Commands::Runs => list_runs(),
            Commands::Config => show_config(),
        }
    }
}

fn open_session() -> Result<Session> {
    let ledger = JsonlLedger::from_config()?;
    Ok(Session::new(Arc::new(RunRegistry::new(Arc::new(ledger)))))
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read from stdin")?;
    Ok(input)
}

fn start_run(problem: &str, deliverable: &str, run_id: Option<&str>) -> Result<()> {
    let session = open_session()?;
    let store = session.start_run(problem, deliverable, run_id)?;
    println!("{}", store.run_id());
    Ok(())
}

fn show_deliverable(run: &str) -> Result<()> {
    let session = open_session()?;
    println!("{}", session.get_deliverable(Some(run))?.text);
    Ok(())
}

fn add_span(run: &str, text: Option<String>, source: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => read_stdin()?,
    };

    let session = open_session()?;
    let span = session.add_span(&text, source, None, Some(run))?;
    println!("{}", span.sid);
    Ok(())
}

fn add_file_span(
    run: &str,
    path: PathBuf,
    start: usize,
    end: usize,
    source: Option<String>,
) -> Result<()> {
    let policy = config::config()?.files.policy();
    let session = open_session()?;
    let span = session.add_file_span(&policy, &path, start, end, source, None, Some(run))?;
    println!("{}", span.sid);
    Ok(())
}

fn list_spans(run: &str, limit: Option<usize>) -> Result<()> {
    let session = open_session()?;
    let spans = session.list_spans(limit, Some(run))?;

    println!("{:<6} {:<10} {:>7}  {:<20} PREVIEW", "SID", "SOURCE", "CHARS", "CREATED");
    println!("{}", "-".repeat(90));

    for span in spans {
        let source = span.source.as_deref().unwrap_or("-");
        let preview: String = span.preview.chars().take(40).collect();
        println!(
            "{:<6} {:<10} {:>7}  {:<20} {}",
            span.sid.to_string(),
            source,
            span.chars,
            span.created_at.format("%Y-%m-%d %H:%M:%S"),
            preview
        );
    }

    Ok(())
}

fn show_span(run: &str, sid: &str) -> Result<()> {
    let session = open_session()?;
    let span = session.get_span(sid, Some(run))?;
    println!("{}", serde_json::to_string_pretty(span.as_ref())?);
    Ok(())
}

fn search_spans(run: &str, query: &str, limit: Option<usize>) -> Result<()> {
    let session = open_session()?;
    let hits = session.search_spans(query, limit, Some(run))?;

    if hits.is_empty() {
        println!("No matching spans");
        return Ok(());
    }

    for hit in hits {
        println!("{:<6} score={:<3} {}", hit.sid.to_string(), hit.score, hit.preview);
    }
    Ok(())
}

fn distill(run: &str, parent: &str, pattern: &str, options: DistillOptions) -> Result<()> {
    let session = open_session()?;
    let span = session.distill_span(parent, pattern, options, Some(run))?;
    println!("{}", span.sid);
    Ok(())
}

/// Build a verifier and per-request options from config plus flags
fn build_verifier(args: &VerifyArgs) -> Result<(Verifier, VerifyOptions, Option<usize>)> {
    let cfg = config::config()?;

    let oracle: Arc<dyn ScoringOracle> = match (&args.oracle, &cfg.oracle) {
        (Some(command), _) => Arc::new(CommandOracle::new(command.clone(), Vec::new())),
        (None, Some(oracle)) => Arc::new(oracle.oracle()),
        (None, None) => anyhow::bail!(
            "No scoring oracle configured (set oracle.command in .spanproof/config.yaml or pass --oracle)"
        ),
    };

    let verifier = Verifier::new(oracle)
        .with_settings(cfg.verification.verifier_settings())
        .with_splitter(cfg.verification.splitter());

    let mut options = cfg.verification.verify_options();
    if let Some(target) = args.target {
        options.default_target = target;
    }
    if let Some(mode) = args.context_mode {
        options.context_mode = mode;
    }
    options.require_citations |= args.require_citations;
    options.include_prompts = args.include_prompts;
    options.verifier_model = args.model.clone();

    Ok((verifier, options, cfg.verification.max_claims))
}

fn print_report(report: &VerificationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for step in &report.steps {
            let cites: Vec<String> = step.cites.iter().map(|s| s.to_string()).collect();
            println!(
                "[{}] {:<20} score={:.3} target={:.2} cites=[{}]  {}",
                step.idx,
                step.verdict.as_str(),
                step.score,
                step.target,
                cites.join(","),
                step.claim
            );
            if let Some(ref error) = step.error {
                println!("      error: {}", error);
            }
        }
        for unresolved in &report.unresolved {
            println!("unresolved citation [{}] in claim {}", unresolved.marker, unresolved.claim_idx);
        }
        if report.truncated > 0 {
            println!("{} claims dropped by max_claims", report.truncated);
        }
        println!();
        println!(
            "passed={} flagged={:?} partial={}",
            report.passed, report.flagged, report.partial
        );
    }

    if !report.passed {
        anyhow::bail!("Verification did not pass ({} claims flagged)", report.flagged.len());
    }
    Ok(())
}

async fn verify_answer(
    run: &str,
    answer: Option<String>,
    max_claims: Option<usize>,
    args: VerifyArgs,
) -> Result<()> {
    let answer = match answer {
        Some(answer) => answer,
        None => read_stdin()?,
    };

    let (verifier, options, default_max_claims) = build_verifier(&args)?;
    let session = open_session()?;

    let report = verifier
        .detect_in_run(&session, Some(run), &answer, options, max_claims.or(default_max_claims))
        .await?;

    print_report(&report, args.json)
}

async fn audit_trace(run: &str, steps: Option<PathBuf>, args: VerifyArgs) -> Result<()> {
    let raw = match steps {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read steps file: {}", path.display()))?,
        None => read_stdin()?,
    };
    let steps: Vec<TraceStep> =
        serde_json::from_str(&raw).context("Steps must be a JSON array of {idx, claim, cites}")?;

    let (verifier, options, _) = build_verifier(&args)?;
    let session = open_session()?;

    let report = verifier
        .audit_trace_budget(AuditRequest {
            steps,
            spans: session.evidence(Some(run))?,
            options,
        })
        .await?;

    print_report(&report, args.json)
}

fn list_runs() -> Result<()> {
    let ledger = JsonlLedger::from_config()?;
    let runs = ledger.list_runs()?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    for run in runs {
        println!("{}", run);
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", cfg.home.display());
    println!("  Runs: {}", cfg.home.join("runs").display());
    println!();

    let v = &cfg.verification;
    println!("Verification:");
    println!("  Default target:    {}", v.default_target);
    println!("  Min target:        {}", v.min_target);
    println!(
        "  Max claims:        {}",
        v.max_claims.map(|n| n.to_string()).unwrap_or_else(|| "unlimited".to_string())
    );
    println!("  Claim overflow:    {:?}", v.claim_overflow);
    println!("  Context mode:      {}", v.context_mode);
    println!("  Require citations: {}", v.require_citations);
    println!("  Max concurrency:   {}", v.max_concurrency);
    println!("  Oracle timeout:    {}s", v.oracle_timeout_seconds);
    println!();

    println!("Files:");
    match &cfg.files.project_root {
        Some(root) => println!("  Project root:  {}", root.display()),
        None => println!("  Project root:  (current directory)"),
    }
    if cfg.files.allowed_roots.is_empty() {
        println!("  Allowed roots: (any)");
    } else {
        for root in &cfg.files.allowed_roots {
            println!("  Allowed root:  {}", root.display());
        }
    }
    println!("  Denylist:      {}", cfg.files.denylist_patterns.join(", "));
    println!();

    match &cfg.oracle {
        Some(oracle) => println!("Oracle: {} {}", oracle.command, oracle.args.join(" ")),
        None => println!("Oracle: (not configured)"),
    }

    Ok(())
}
