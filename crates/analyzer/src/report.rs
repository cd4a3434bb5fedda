//! Slither `--json` report envelope.

use audit_core::{Finding, SourceLocation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Results,
}

#[derive(Debug, Default, Deserialize)]
struct Results {
    #[serde(default)]
    detectors: Vec<Detector>,
}

#[derive(Debug, Deserialize)]
struct Detector {
    #[serde(default)]
    check: Option<String>,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(default)]
    source_mapping: Option<SourceMapping>,
}

#[derive(Debug, Deserialize)]
struct SourceMapping {
    #[serde(default)]
    filename_relative: Option<String>,
    #[serde(default)]
    filename_short: Option<String>,
    #[serde(default)]
    lines: Vec<u32>,
}

/// What a report says once decoded.
#[derive(Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Findings(Vec<Finding>),
    /// `success: false`, with the tool's message.
    ToolError(String),
}

/// Decodes a report. Findings keep the tool's order.
pub fn parse_report(bytes: &[u8]) -> Result<ReportOutcome, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if !envelope.success {
        let msg = envelope
            .error
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "no error message".to_string());
        return Ok(ReportOutcome::ToolError(msg));
    }
    let findings = envelope
        .results
        .detectors
        .into_iter()
        .map(Detector::into_finding)
        .collect();
    Ok(ReportOutcome::Findings(findings))
}

impl Detector {
    fn into_finding(self) -> Finding {
        // The first element with a source mapping is the primary location.
        let location = self
            .elements
            .into_iter()
            .filter_map(|e| e.source_mapping)
            .find_map(|m| {
                let file = m.filename_relative.or(m.filename_short)?;
                Some(SourceLocation {
                    file,
                    lines: m.lines,
                })
            });
        Finding {
            check: self.check,
            impact: self.impact,
            confidence: self.confidence,
            description: self.description.trim_end().to_string(),
            location,
        }
    }
}
