use std::sync::Arc;

use audit_core::api::SubmitRequest;
use audit_core::{Job, JobId, JobSource};
use audit_storage::{ArtifactStore, JobStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::Orchestrator;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("file name must end in .sol: {0:?}")]
    InvalidFileName(String),

    #[error("contract source is empty")]
    EmptySource,

    #[error("invalid contract address: {0:?}")]
    InvalidAddress(String),

    #[error("auditing deployed contracts by address is not supported yet: {0}")]
    UnsupportedSource(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Whether the submitter, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SubmitError::Store(_))
    }
}

/// Accepts new audits: stores the source, creates the pending job and
/// triggers the orchestrator without waiting for it.
pub struct SubmissionGateway {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    orchestrator: Arc<Orchestrator>,
}

impl SubmissionGateway {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            orchestrator,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        match request {
            SubmitRequest::Upload { file_name, source } => {
                self.submit_upload(&file_name, source.into_bytes()).await
            }
            SubmitRequest::Address { contract_address } => {
                self.submit_address(&contract_address).await
            }
        }
    }

    pub async fn submit_upload(&self, file_name: &str, source: Vec<u8>) -> Result<JobId, SubmitError> {
        let file_name = file_name.trim();
        if !file_name.ends_with(".sol") || file_name.len() == ".sol".len() {
            return Err(SubmitError::InvalidFileName(file_name.to_string()));
        }
        if source.iter().all(u8::is_ascii_whitespace) {
            return Err(SubmitError::EmptySource);
        }

        let job_id = JobId::new();
        let artifact_ref = self
            .artifacts
            .put_blob(&format!("contracts/{job_id}.sol"), source)
            .await?;
        let source = JobSource::Upload {
            artifact_ref,
            file_name: file_name.to_string(),
        };
        if let Err(e) = self.jobs.insert_job(Job::with_id(job_id.clone(), source.clone())).await {
            // The id is fresh, so a conflict means an attempt that timed out
            // still landed. Anything else leaves no job behind.
            if !e.is_conflict() || !self.job_landed(&job_id, &source).await {
                return Err(e.into());
            }
            warn!(job_id = %job_id, "job insert reported a conflict but the record is ours");
        }
        info!(job_id = %job_id, file_name, "audit submitted");

        // Detached: the pipeline outlives this call.
        drop(self.orchestrator.start_job(job_id.clone()));
        Ok(job_id)
    }

    async fn job_landed(&self, job_id: &JobId, source: &JobSource) -> bool {
        match self.jobs.get_job(job_id).await {
            Ok(job) => job.source == *source,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "cannot confirm job insert");
                false
            }
        }
    }

    pub async fn submit_address(&self, address: &str) -> Result<JobId, SubmitError> {
        validate_address(address)?;
        Err(SubmitError::UnsupportedSource(address.to_string()))
    }
}

/// `0x` followed by 40 hex digits.
pub fn validate_address(address: &str) -> Result<(), SubmitError> {
    let valid = address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(SubmitError::InvalidAddress(address.to_string()))
    }
}
