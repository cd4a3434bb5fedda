use async_trait::async_trait;

use audit_core::{AuditResult, ComplianceProof, Job, JobId, JobUpdate};

use crate::StoreResult;

/// Durable job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a job. `Conflict` if the id exists.
    async fn insert_job(&self, job: Job) -> StoreResult<()>;

    /// `NotFound` if absent.
    async fn get_job(&self, id: &JobId) -> StoreResult<Job>;

    /// Partial update by id, safe to repeat.
    ///
    /// Only non-terminal jobs accept updates; a terminal job yields `Conflict`
    /// so concurrent runners cannot overwrite each other's outcome.
    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StoreResult<Job>;

    /// Jobs whose status is still `pending`, oldest first.
    async fn list_unfinished(&self) -> StoreResult<Vec<Job>>;
}

/// Blob storage for uploaded sources and generated reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes (or overwrites) `path` and returns a durable URL for it.
    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> StoreResult<String>;

    /// Reads a blob by the URL `put_blob` returned. `NotFound` if absent.
    async fn get_blob(&self, url: &str) -> StoreResult<Vec<u8>>;
}

/// Audit results, at most one per job.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert-if-absent. `Conflict` if the job already has a result.
    async fn insert_result(&self, result: AuditResult) -> StoreResult<()>;

    async fn get_result(&self, job_id: &JobId) -> StoreResult<Option<AuditResult>>;
}

/// Compliance proofs produced by the proof stub.
#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn insert_proof(&self, proof: ComplianceProof) -> StoreResult<()>;

    async fn list_proofs(&self, job_id: &JobId) -> StoreResult<Vec<ComplianceProof>>;
}
