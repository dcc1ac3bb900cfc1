//! Subprocess scoring oracle.
//!
//! Spawns a configured command, writes the `ScoreRequest` as JSON to stdin
//! and reads `{"score": <f64>, "rationale": <str>?}` from stdout. Writing the
//! input and waiting for the child share one deadline; the child is killed
//! when it passes.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tokio::time::timeout;

use super::{OracleError, OracleScore, ScoreRequest, ScoringOracle};

/// Oracle backed by an external program
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    /// Create an oracle that runs `program` with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    async fn run(&self, input: Vec<u8>, step_timeout: Duration) -> Result<Vec<u8>, OracleError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Spawn(format!("{}: {}", self.program, e)))?;

        let stdin = child.stdin.take();
        let write_input = async move {
            if let Some(mut stdin) = stdin {
                // A child that exits without reading its input is judged by its exit status
                match stdin.write_all(&input).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                // Drop stdin to signal EOF
            }
            Ok(())
        };

        // Dropping the child on timeout kills it
        let (written, output) = timeout(step_timeout, async {
            tokio::join!(write_input, child.wait_with_output())
        })
        .await
        .map_err(|_| OracleError::Timeout(step_timeout))?;

        let output =
            output.map_err(|e| OracleError::Failed(format!("Failed to wait for oracle: {}", e)))?;
        written.map_err(|e| OracleError::Failed(format!("Failed to write to oracle stdin: {}", e)))?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(OracleError::Failed(format!(
                "Oracle '{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// Drive `future` from synchronous code.
///
/// Uses the ambient runtime when called from one of its blocking threads,
/// otherwise a private current-thread runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output, OracleError> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(future)),
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| OracleError::Failed(format!("Failed to start oracle runtime: {}", e)))?;
            Ok(runtime.block_on(future))
        }
    }
}

impl ScoringOracle for CommandOracle {
    fn name(&self) -> &str {
        &self.program
    }

    fn score(&self, request: &ScoreRequest, timeout: Duration) -> Result<OracleScore, OracleError> {
        let input = serde_json::to_vec(request)
            .map_err(|e| OracleError::Failed(format!("Failed to serialize request: {}", e)))?;

        let output = block_on(self.run(input, timeout))??;

        let score: OracleScore = serde_json::from_slice(&output).map_err(|e| {
            OracleError::Failed(format!(
                "Oracle output is not a score object ({}): {}",
                e,
                String::from_utf8_lossy(&output).trim()
            ))
        })?;

        score.validate()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn request() -> ScoreRequest {
        ScoreRequest {
            claim: "The sky is blue.".to_string(),
            context: "[S2] The sky is blue.".to_string(),
            target: 0.9,
            model: None,
        }
    }

    fn sh(script: &str) -> CommandOracle {
        CommandOracle::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_reads_score_from_stdout() {
        let oracle = sh(r#"cat > /dev/null; echo '{"score": 0.75, "rationale": "ok"}'"#);
        let score = oracle.score(&request(), Duration::from_secs(5)).unwrap();
        assert_eq!(score.score, 0.75);
        assert_eq!(score.rationale.as_deref(), Some("ok"));
    }

    #[test]
    fn test_receives_request_on_stdin() {
        // Echo back a score only if the claim made it through stdin
        let oracle = sh(r#"if grep -q 'The sky is blue' ; then echo '{"score": 1.0}'; else echo '{"score": 0.0}'; fi"#);
        let score = oracle.score(&request(), Duration::from_secs(5)).unwrap();
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let oracle = sh("cat > /dev/null; echo boom >&2; exit 3");
        let err = oracle.score(&request(), Duration::from_secs(5)).unwrap_err();
        match err {
            OracleError::Failed(msg) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("boom"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let oracle = sh("sleep 5");
        let start = Instant::now();
        let err = oracle.score(&request(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_holds_when_child_ignores_large_input() {
        // Far more than a pipe buffer, never read by the child
        let mut large = request();
        large.context = "x".repeat(1 << 20);

        let oracle = sh("sleep 3");
        let start = Instant::now();
        let err = oracle.score(&large, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scores_from_blocking_thread_of_runtime() {
        let oracle = sh(r#"cat > /dev/null; echo '{"score": 0.5}'"#);
        let score = tokio::task::spawn_blocking(move || oracle.score(&request(), Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(score.score, 0.5);
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let oracle = sh(r#"cat > /dev/null; echo '{"score": 2.0}'"#);
        let err = oracle.score(&request(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, OracleError::InvalidScore(_)));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let oracle = CommandOracle::new("/definitely/not/a/binary", vec![]);
        let err = oracle.score(&request(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, OracleError::Spawn(_)));
    }
}
