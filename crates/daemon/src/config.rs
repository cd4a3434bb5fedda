use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use audit_analyzer::AnalyzerConfig;
use audit_pipeline::DEFAULT_GATING_SEVERITY;
use audit_storage::RetryPolicy;
use serde::{Deserialize, Serialize};

/// `auditd.toml`. Only `[analyzer] timeout_secs` is mandatory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Re-trigger jobs left `pending` by a previous process.
    #[serde(default = "default_true")]
    pub resume_unfinished: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            resume_unfinished: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Defaults to `<data_dir>/artifacts`.
    #[serde(default)]
    pub artifact_root: Option<String>,
    /// Defaults to `<data_dir>/work`.
    #[serde(default)]
    pub work_root: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            artifact_root: None,
            work_root: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Severity label counted against the proof threshold.
    #[serde(default = "default_gating_severity")]
    pub gating_severity: String,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            gating_severity: default_gating_severity(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    "~/.auditd".to_string()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_attempt_timeout_ms() -> u64 {
    RetryPolicy::default().attempt_timeout.as_millis() as u64
}

fn default_backoff_ms() -> u64 {
    RetryPolicy::default().backoff.as_millis() as u64
}

fn default_gating_severity() -> String {
    DEFAULT_GATING_SEVERITY.to_string()
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg = Self::from_toml_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Err(msg) = self.analyzer.validate() {
            bail!(msg);
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.attempt_timeout_ms == 0 {
            bail!("retry.attempt_timeout_ms must be at least 1");
        }
        if self.compliance.gating_severity.trim().is_empty() {
            bail!("compliance.gating_severity must not be empty");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        expand(&self.storage.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("audit.db")
    }

    pub fn artifact_root(&self) -> PathBuf {
        match &self.storage.artifact_root {
            Some(p) => expand(p),
            None => self.data_dir().join("artifacts"),
        }
    }

    pub fn work_root(&self) -> PathBuf {
        match &self.storage.work_root {
            Some(p) => expand(p),
            None => self.data_dir().join("work"),
        }
    }
}

fn expand(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}
