use std::collections::BTreeMap;

use crate::Finding;

/// Label used when a finding carries no severity.
pub const UNKNOWN_SEVERITY: &str = "Unknown";

/// Finding count per severity label. Labels are whatever the analyzer emits.
pub type SeverityCounts = BTreeMap<String, u64>;

impl Finding {
    /// Severity label, falling back to [`UNKNOWN_SEVERITY`] when absent or blank.
    pub fn severity(&self) -> &str {
        match self.impact.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ => UNKNOWN_SEVERITY,
        }
    }
}

/// Tallies findings by severity label.
pub fn tally_severities(findings: &[Finding]) -> SeverityCounts {
    let mut counts = SeverityCounts::new();
    for finding in findings {
        *counts.entry(finding.severity().to_string()).or_insert(0) += 1;
    }
    counts
}
