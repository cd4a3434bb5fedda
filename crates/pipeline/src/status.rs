use audit_core::api::StatusResponse;
use audit_core::{JobId, JobStatus};
use audit_storage::{JobStore, ResultStore, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A completed job must have a result; its absence is a store inconsistency.
    #[error("job {0} is completed but has no result")]
    MissingResult(JobId),

    #[error(transparent)]
    Store(StoreError),
}

/// Read-only view of a job for polling clients. Analyzer output and stderr
/// never appear here.
pub async fn job_status(
    jobs: &dyn JobStore,
    results: &dyn ResultStore,
    job_id: &JobId,
) -> Result<StatusResponse, StatusError> {
    let job = jobs.get_job(job_id).await.map_err(|e| match e {
        e if e.is_not_found() => StatusError::NotFound(job_id.clone()),
        e => StatusError::Store(e),
    })?;
    match job.status {
        JobStatus::Pending => Ok(StatusResponse::Pending {
            stage: job.pipeline_stage,
        }),
        JobStatus::Error => Ok(StatusResponse::Error {
            stage: job.pipeline_stage,
        }),
        JobStatus::Completed => {
            let result = results
                .get_result(job_id)
                .await
                .map_err(StatusError::Store)?
                .ok_or_else(|| StatusError::MissingResult(job_id.clone()))?;
            Ok(StatusResponse::Completed {
                severity_counts: result.severity_counts,
                report_url: result.report_ref,
            })
        }
    }
}
