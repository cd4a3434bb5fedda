use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use audit_core::Finding;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::report::{parse_report, ReportOutcome};
use crate::{AnalyzerConfig, AnalyzerError, FailureReason};

/// Result of one successful analyzer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutput {
    pub findings: Vec<Finding>,
    /// The report exactly as the tool wrote it.
    pub raw_output: Vec<u8>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyzes one source file. Each call spawns at most one subprocess.
    async fn run_analysis(
        &self,
        source: &Path,
        config: &AnalyzerConfig,
    ) -> Result<AnalysisOutput, AnalyzerError>;
}

/// Report location for `source`: a sibling file, so it shares the source's
/// per-job directory.
pub fn output_path_for(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "contract".to_string());
    source.with_file_name(format!("{stem}.analysis.json"))
}

/// Runs Slither (or any program that follows its `--json <path>` contract).
#[derive(Debug, Default, Clone, Copy)]
pub struct SlitherInvoker;

impl SlitherInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for SlitherInvoker {
    async fn run_analysis(
        &self,
        source: &Path,
        config: &AnalyzerConfig,
    ) -> Result<AnalysisOutput, AnalyzerError> {
        let output_path = output_path_for(source);
        remove_stale(&output_path).await;

        let args = config.args_for(source, &output_path);
        debug!(program = %config.program, ?args, "spawning analyzer");

        let mut cmd = Command::new(&config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = source.parent() {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|source| AnalyzerError::SubprocessLaunchFailed {
                program: config.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match timeout(config.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AnalyzerError::AnalysisFailed {
                    reason: FailureReason::ExitStatus(None),
                    stderr: format!("wait failed: {e}"),
                })
            }
            Err(_) => {
                warn!(timeout_secs = config.timeout_secs, "analyzer timed out; killed");
                return Err(AnalyzerError::AnalysisFailed {
                    reason: FailureReason::Timeout(config.timeout()),
                    stderr: String::new(),
                });
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !output.status.success() {
            return Err(AnalyzerError::AnalysisFailed {
                reason: FailureReason::ExitStatus(exit_code),
                stderr,
            });
        }

        let raw_output = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(AnalyzerError::OutputParseFailed {
                    path: output_path,
                    detail: format!("output file not readable: {e}"),
                })
            }
        };

        let findings = match parse_report(&raw_output) {
            Ok(ReportOutcome::Findings(findings)) => findings,
            Ok(ReportOutcome::ToolError(msg)) => {
                return Err(AnalyzerError::AnalysisFailed {
                    reason: FailureReason::ToolReported(msg),
                    stderr,
                })
            }
            Err(e) => {
                return Err(AnalyzerError::OutputParseFailed {
                    path: output_path,
                    detail: e.to_string(),
                })
            }
        };

        info!(findings = findings.len(), duration_ms, "analysis finished");
        Ok(AnalysisOutput {
            findings,
            raw_output,
            exit_code,
            duration_ms,
        })
    }
}

async fn remove_stale(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale analyzer output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_next_to_source() {
        assert_eq!(
            output_path_for(Path::new("/work/job-1-abc/Vault.sol")),
            PathBuf::from("/work/job-1-abc/Vault.analysis.json")
        );
    }
}
