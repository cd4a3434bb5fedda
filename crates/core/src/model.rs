use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{now_ms, EpochMs, JobId, ProofId, SeverityCounts};

/// Authoritative job status. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory progress marker. Only `JobStatus` drives control flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    Downloading,
    Analyzing,
    UploadingReport,
    Finalizing,
    Completed,
    DownloadError,
    AnalysisError,
    ParseError,
    UploadError,
    DbInsertError,
}

impl PipelineStage {
    /// Stages in the order a successful run visits them.
    pub const PROGRESSION: [PipelineStage; 6] = [
        PipelineStage::Pending,
        PipelineStage::Downloading,
        PipelineStage::Analyzing,
        PipelineStage::UploadingReport,
        PipelineStage::Finalizing,
        PipelineStage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "pending",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::UploadingReport => "uploading_report",
            PipelineStage::Finalizing => "finalizing",
            PipelineStage::Completed => "completed",
            PipelineStage::DownloadError => "download_error",
            PipelineStage::AnalysisError => "analysis_error",
            PipelineStage::ParseError => "parse_error",
            PipelineStage::UploadError => "upload_error",
            PipelineStage::DbInsertError => "db_insert_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let stage = match s {
            "pending" => PipelineStage::Pending,
            "downloading" => PipelineStage::Downloading,
            "analyzing" => PipelineStage::Analyzing,
            "uploading_report" => PipelineStage::UploadingReport,
            "finalizing" => PipelineStage::Finalizing,
            "completed" => PipelineStage::Completed,
            "download_error" => PipelineStage::DownloadError,
            "analysis_error" => PipelineStage::AnalysisError,
            "parse_error" => PipelineStage::ParseError,
            "upload_error" => PipelineStage::UploadError,
            "db_insert_error" => PipelineStage::DbInsertError,
            _ => return None,
        };
        Some(stage)
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PipelineStage::DownloadError
                | PipelineStage::AnalysisError
                | PipelineStage::ParseError
                | PipelineStage::UploadError
                | PipelineStage::DbInsertError
        )
    }

    /// Position in [`PipelineStage::PROGRESSION`]; error tags report `None`.
    pub fn ordinal(&self) -> Option<usize> {
        Self::PROGRESSION.iter().position(|s| s == self)
    }

    /// Error tag recorded when work inside this stage fails.
    ///
    /// Parse failures inside `analyzing` are tagged separately by the caller.
    pub fn failure_tag(&self) -> PipelineStage {
        match self {
            PipelineStage::Pending | PipelineStage::Downloading => PipelineStage::DownloadError,
            PipelineStage::Analyzing => PipelineStage::AnalysisError,
            PipelineStage::UploadingReport => PipelineStage::UploadError,
            PipelineStage::Finalizing | PipelineStage::Completed => PipelineStage::DbInsertError,
            other => *other,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the contract under audit comes from. Exactly one variant per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSource {
    /// Source file previously written to the artifact store.
    Upload {
        artifact_ref: String,
        file_name: String,
    },
    /// Deployed contract address.
    Address {
        address: String,
        #[serde(default)]
        chain: Option<String>,
    },
}

impl JobSource {
    pub fn kind(&self) -> &'static str {
        match self {
            JobSource::Upload { .. } => "upload",
            JobSource::Address { .. } => "address",
        }
    }
}

/// One audit request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub source: JobSource,
    pub status: JobStatus,
    pub pipeline_stage: PipelineStage,
    pub created_at_ms: EpochMs,
    pub updated_at_ms: EpochMs,
}

impl Job {
    /// New job in `pending` with a fresh id.
    pub fn new_pending(source: JobSource) -> Self {
        Self::with_id(JobId::new(), source)
    }

    pub fn with_id(id: JobId, source: JobSource) -> Self {
        let now = now_ms();
        Self {
            id,
            source,
            status: JobStatus::Pending,
            pipeline_stage: PipelineStage::Pending,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(stage) = update.pipeline_stage {
            self.pipeline_stage = stage;
        }
        self.updated_at_ms = now_ms();
    }
}

/// Partial update by id; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub pipeline_stage: Option<PipelineStage>,
}

impl JobUpdate {
    pub fn stage(stage: PipelineStage) -> Self {
        Self {
            status: None,
            pipeline_stage: Some(stage),
        }
    }

    pub fn terminal(status: JobStatus, stage: PipelineStage) -> Self {
        Self {
            status: Some(status),
            pipeline_stage: Some(stage),
        }
    }
}

/// Location of a finding in the analyzed source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    #[serde(default)]
    pub lines: Vec<u32>,
}

/// One issue reported by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// Detector name, e.g. `reentrancy-eth`.
    #[serde(default)]
    pub check: Option<String>,
    /// Severity label as emitted by the tool.
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    pub description: String,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

/// Outcome of a successful audit. At most one per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditResult {
    pub job_id: JobId,
    pub severity_counts: SeverityCounts,
    pub report_ref: String,
    pub completed_at_ms: EpochMs,
}

/// Stored compliance attestation for a job and threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceProof {
    pub id: ProofId,
    pub job_id: JobId,
    pub threshold: u32,
    pub gating_severity: String,
    pub passed: bool,
    pub scheme: String,
    pub proof: String,
    pub created_at_ms: EpochMs,
}
