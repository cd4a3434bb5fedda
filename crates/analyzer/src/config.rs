use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to invoke the analyzer. `timeout_secs` has no default: a run without a
/// wall-clock bound is never started.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyzerConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Compiler version hint, passed as `--solc-solcs-select <version>`.
    #[serde(default)]
    pub solc_version: Option<String>,
    pub timeout_secs: u64,
    /// Appended after the generated arguments.
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
}

fn default_program() -> String {
    "slither".to_string()
}

// Slither exits non-zero whenever it reports findings unless told otherwise.
fn default_extra_args() -> Vec<String> {
    vec!["--fail-none".to_string()]
}

impl AnalyzerConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            program: default_program(),
            solc_version: None,
            timeout_secs,
            extra_args: default_extra_args(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("analyzer.program must not be empty".into());
        }
        if self.timeout_secs == 0 {
            return Err("analyzer.timeout_secs must be at least 1".into());
        }
        if let Some(v) = &self.solc_version {
            if v.trim().is_empty() {
                return Err("analyzer.solc_version must not be blank".into());
            }
        }
        Ok(())
    }

    /// Arguments for one run, excluding the program itself.
    pub fn args_for(&self, source: &std::path::Path, output: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            source.display().to_string(),
            "--json".to_string(),
            output.display().to_string(),
        ];
        if let Some(v) = &self.solc_version {
            args.push("--solc-solcs-select".to_string());
            args.push(v.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn timeout_is_required() {
        let err = serde_json::from_str::<AnalyzerConfig>(r#"{"program":"slither"}"#).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));

        let cfg: AnalyzerConfig = serde_json::from_str(r#"{"timeout_secs":30}"#).unwrap();
        assert_eq!(cfg, AnalyzerConfig::new(30));
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(AnalyzerConfig::new(0).validate().is_err());
        assert!(AnalyzerConfig::new(1).validate().is_ok());
    }

    #[test]
    fn builds_argument_list() {
        let mut cfg = AnalyzerConfig::new(5);
        cfg.solc_version = Some("0.8.19".into());
        let args = cfg.args_for(Path::new("/w/a.sol"), Path::new("/w/a.analysis.json"));
        assert_eq!(
            args,
            [
                "/w/a.sol",
                "--json",
                "/w/a.analysis.json",
                "--solc-solcs-select",
                "0.8.19",
                "--fail-none"
            ]
        );
    }
}
