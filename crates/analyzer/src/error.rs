use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// The analyzer binary could not be started (missing or not executable).
    #[error("failed to launch {program}: {source}")]
    SubprocessLaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The analyzer ran but did not produce a usable verdict.
    #[error("analysis failed: {reason}")]
    AnalysisFailed { reason: FailureReason, stderr: String },

    #[error("could not parse analyzer output {}: {detail}", path.display())]
    OutputParseFailed { path: PathBuf, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Non-zero exit. `None` when the process was killed by a signal.
    ExitStatus(Option<i32>),
    Timeout(Duration),
    /// The tool wrote `success: false` into its report.
    ToolReported(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitStatus(Some(code)) => write!(f, "exit code {code}"),
            FailureReason::ExitStatus(None) => f.write_str("terminated by signal"),
            FailureReason::Timeout(after) => write!(f, "timeout after {}s", after.as_secs()),
            FailureReason::ToolReported(msg) => write!(f, "tool reported error: {msg}"),
        }
    }
}

impl AnalyzerError {
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, AnalyzerError::OutputParseFailed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AnalyzerError::AnalysisFailed {
                reason: FailureReason::Timeout(_),
                ..
            }
        )
    }

    /// Captured stderr, if the process got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            AnalyzerError::AnalysisFailed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
