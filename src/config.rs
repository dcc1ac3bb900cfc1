//! Configuration for spanproof.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SPANPROOF_HOME)
//! 2. Config file (.spanproof/config.yaml)
//! 3. Defaults (~/.spanproof)
//!
//! Config file discovery:
//! - Searches current directory and parents for .spanproof/config.yaml
//! - `paths.home` is relative to the .spanproof/ directory
//! - `files.*` paths are relative to the project root (parent of .spanproof/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::CommandOracle;
use crate::claims::{ClaimSplitter, SplitMode};
use crate::evidence::{default_denylist, LocalFsPolicy};
use crate::verify::{
    ClaimOverflow, ContextMode, VerifierSettings, VerifyOptions, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_TARGET,
};

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "SPANPROOF_HOME";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
    #[serde(default)]
    pub files: Option<FilesConfig>,
    #[serde(default)]
    pub oracle: Option<OracleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .spanproof/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationConfig {
    pub default_target: Option<f64>,
    pub min_target: Option<f64>,
    pub max_claims: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub oracle_timeout_seconds: Option<u64>,
    pub claim_overflow: Option<ClaimOverflow>,
    pub context_mode: Option<ContextMode>,
    pub require_citations: Option<bool>,
    pub claim_split: Option<SplitMode>,
    pub mask_non_assertions: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesConfig {
    pub project_root: Option<String>,
    #[serde(default)]
    pub allowed_roots: Vec<String>,
    pub denylist_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to spanproof home (run ledgers)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub verification: VerificationSettings,
    pub files: FileSettings,
    /// Scoring oracle command, if configured
    pub oracle: Option<OracleConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSettings {
    pub default_target: f64,
    pub min_target: f64,
    pub max_claims: Option<usize>,
    pub max_concurrency: usize,
    pub oracle_timeout_seconds: u64,
    pub claim_overflow: ClaimOverflow,
    pub context_mode: ContextMode,
    pub require_citations: bool,
    pub claim_split: SplitMode,
    pub mask_non_assertions: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            default_target: DEFAULT_TARGET,
            min_target: 0.0,
            max_claims: Some(25),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            oracle_timeout_seconds: 30,
            claim_overflow: ClaimOverflow::Truncate,
            context_mode: ContextMode::All,
            require_citations: false,
            claim_split: SplitMode::Sentences,
            mask_non_assertions: false,
        }
    }
}

impl VerificationSettings {
    fn from_file(config: &VerificationConfig) -> Self {
        let defaults = Self::default();
        Self {
            default_target: config.default_target.unwrap_or(defaults.default_target),
            min_target: config.min_target.unwrap_or(defaults.min_target),
            max_claims: config.max_claims.or(defaults.max_claims),
            max_concurrency: config.max_concurrency.unwrap_or(defaults.max_concurrency),
            oracle_timeout_seconds: config
                .oracle_timeout_seconds
                .unwrap_or(defaults.oracle_timeout_seconds),
            claim_overflow: config.claim_overflow.unwrap_or(defaults.claim_overflow),
            context_mode: config.context_mode.unwrap_or(defaults.context_mode),
            require_citations: config.require_citations.unwrap_or(defaults.require_citations),
            claim_split: config.claim_split.unwrap_or(defaults.claim_split),
            mask_non_assertions: config
                .mask_non_assertions
                .unwrap_or(defaults.mask_non_assertions),
        }
    }

    /// Engine settings for a `Verifier`
    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            max_concurrency: self.max_concurrency,
            oracle_timeout: Duration::from_secs(self.oracle_timeout_seconds),
            overflow: self.claim_overflow,
            min_target: self.min_target,
        }
    }

    /// Default per-request options
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            default_target: self.default_target,
            require_citations: self.require_citations,
            context_mode: self.context_mode,
            mask_non_assertions: self.mask_non_assertions,
            ..Default::default()
        }
    }

    pub fn splitter(&self) -> ClaimSplitter {
        ClaimSplitter::new(self.claim_split)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSettings {
    pub project_root: Option<PathBuf>,
    pub allowed_roots: Vec<PathBuf>,
    pub denylist_patterns: Vec<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            project_root: None,
            allowed_roots: Vec::new(),
            denylist_patterns: default_denylist(),
        }
    }
}

impl FileSettings {
    /// Filesystem policy for file-backed spans
    pub fn policy(&self) -> LocalFsPolicy {
        LocalFsPolicy::new(
            self.project_root.clone(),
            self.allowed_roots.clone(),
            self.denylist_patterns.clone(),
        )
    }
}

impl OracleConfig {
    pub fn oracle(&self) -> CommandOracle {
        CommandOracle::new(self.command.clone(), self.args.clone())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".spanproof").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine a parsed config file (if any) with the environment
fn resolve_config(
    config_file: Option<(PathBuf, ConfigFile)>,
    env_home: Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    let Some((config_path, config)) = config_file else {
        let home = env_home.map(PathBuf::from).unwrap_or(default_home);
        return ResolvedConfig {
            home,
            config_file: None,
            verification: VerificationSettings::default(),
            files: FileSettings::default(),
            oracle: None,
        };
    };

    // .spanproof/ and the project root above it
    let spanproof_dir = config_path.parent().unwrap_or(Path::new("."));
    let base_dir = spanproof_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(spanproof_dir, home_path)
    } else {
        default_home
    };

    let verification = config
        .verification
        .as_ref()
        .map(VerificationSettings::from_file)
        .unwrap_or_default();

    let files = match config.files {
        Some(files) => FileSettings {
            project_root: Some(
                files
                    .project_root
                    .as_deref()
                    .map(|p| resolve_path(base_dir, p))
                    .unwrap_or_else(|| base_dir.to_path_buf()),
            ),
            allowed_roots: files
                .allowed_roots
                .iter()
                .map(|p| resolve_path(base_dir, p))
                .collect(),
            denylist_patterns: files.denylist_patterns.unwrap_or_else(default_denylist),
        },
        None => FileSettings {
            project_root: Some(base_dir.to_path_buf()),
            ..Default::default()
        },
    };

    ResolvedConfig {
        home,
        config_file: Some(config_path),
        verification,
        files,
        oracle: config.oracle,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".spanproof");

    let config_file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    Ok(resolve_config(
        config_file,
        std::env::var(HOME_ENV).ok(),
        default_home,
    ))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the runs directory ($SPANPROOF_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(".spanproof");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, None, PathBuf::from("/home/u/.spanproof"));

        assert_eq!(config.home, PathBuf::from("/home/u/.spanproof"));
        assert!(config.config_file.is_none());
        assert_eq!(config.verification, VerificationSettings::default());
        assert!(config.oracle.is_none());
    }

    #[test]
    fn test_env_home_wins() {
        let config = resolve_config(None, Some("/tmp/sp".to_string()), PathBuf::from("/unused"));
        assert_eq!(config.home, PathBuf::from("/tmp/sp"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
verification:
  default_target: 0.9
  min_target: 0.5
  max_claims: 10
  claim_overflow: fail
  context_mode: cited
  require_citations: true
  claim_split: lines
files:
  allowed_roots: [docs]
oracle:
  command: scorer
  args: ["--json"]
"#,
        );

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));

        let config = resolve_config(Some((config_path.clone(), parsed)), None, PathBuf::from("/unused"));
        assert_eq!(config.home, config_path.parent().unwrap().join("state"));

        let v = &config.verification;
        assert_eq!(v.default_target, 0.9);
        assert_eq!(v.min_target, 0.5);
        assert_eq!(v.max_claims, Some(10));
        assert_eq!(v.claim_overflow, ClaimOverflow::Fail);
        assert_eq!(v.context_mode, ContextMode::Cited);
        assert!(v.require_citations);
        assert_eq!(v.claim_split, SplitMode::Lines);
        assert_eq!(v.max_concurrency, DEFAULT_MAX_CONCURRENCY);

        let settings = v.verifier_settings();
        assert_eq!(settings.overflow, ClaimOverflow::Fail);
        assert_eq!(settings.oracle_timeout, Duration::from_secs(30));

        assert_eq!(config.files.allowed_roots, vec![temp.path().join("docs")]);
        assert_eq!(config.files.denylist_patterns, default_denylist());

        let oracle = config.oracle.unwrap();
        assert_eq!(oracle.command, "scorer");
        assert_eq!(oracle.args, vec!["--json".to_string()]);
    }

    #[test]
    fn test_minimal_config_file() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "version: \"1.0\"");

        let parsed = load_config_file(&config_path).unwrap();
        let config = resolve_config(Some((config_path, parsed)), None, PathBuf::from("/default"));

        assert_eq!(config.home, PathBuf::from("/default"));
        assert_eq!(config.files.project_root.as_deref(), Some(temp.path()));
        assert_eq!(config.verification.max_claims, Some(25));
    }

    #[test]
    fn test_invalid_enum_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "verification:\n  context_mode: everything");
        assert!(load_config_file(&config_path).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
