use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use audit_core::{AuditResult, ComplianceProof, Job, JobId, JobStatus, JobUpdate};

use crate::traits::{ArtifactStore, JobStore, ProofStore, ResultStore};
use crate::{StoreError, StoreResult};

const URL_SCHEME: &str = "mem://";

/// In-memory store for tests. Not durable, but records every write so tests
/// can assert on ordering and idempotence.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, AuditResult>,
    proofs: Vec<ComplianceProof>,
    blobs: HashMap<String, Vec<u8>>,
    writes: Vec<Write>,
}

/// A mutation applied to the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    InsertJob(JobId),
    UpdateJob(JobId, JobUpdate),
    PutBlob(String),
    InsertResult(JobId),
    InsertProof(JobId),
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All successful writes so far.
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Updates applied to one job, in order.
    pub fn job_updates(&self, id: &JobId) -> Vec<JobUpdate> {
        self.lock()
            .writes
            .iter()
            .filter_map(|w| match w {
                Write::UpdateJob(job_id, update) if job_id == id => Some(*update),
                _ => None,
            })
            .collect()
    }

    /// Keys of every stored blob.
    pub fn blob_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.lock().blobs.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn url_for(path: &str) -> String {
        format!("{URL_SCHEME}{path}")
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::conflict("job", job.id.as_str(), "already exists"));
        }
        inner.writes.push(Write::InsertJob(job.id.clone()));
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("job", id.as_str()))
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StoreResult<Job> {
        let mut inner = self.lock();
        if update.status == Some(JobStatus::Error) && inner.results.contains_key(id) {
            return Err(StoreError::conflict("job", id.as_str(), "a result is already recorded"));
        }
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("job", id.as_str()))?;
        if job.status.is_terminal() {
            return Err(StoreError::conflict(
                "job",
                id.as_str(),
                format!("status is terminal ({})", job.status),
            ));
        }
        job.apply(&update);
        let updated = job.clone();
        inner.writes.push(Write::UpdateJob(id.clone(), update));
        Ok(updated)
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at_ms);
        Ok(jobs)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        if path.is_empty() {
            return Err(StoreError::InvalidKey(path.to_string()));
        }
        let mut inner = self.lock();
        inner.blobs.insert(path.to_string(), bytes);
        inner.writes.push(Write::PutBlob(path.to_string()));
        Ok(Self::url_for(path))
    }

    async fn get_blob(&self, url: &str) -> StoreResult<Vec<u8>> {
        let key = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| StoreError::InvalidKey(url.to_string()))?;
        self.lock()
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("blob", url))
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn insert_result(&self, result: AuditResult) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.results.contains_key(&result.job_id) {
            return Err(StoreError::conflict(
                "audit_result",
                result.job_id.as_str(),
                "already recorded",
            ));
        }
        inner.writes.push(Write::InsertResult(result.job_id.clone()));
        inner.results.insert(result.job_id.clone(), result);
        Ok(())
    }

    async fn get_result(&self, job_id: &JobId) -> StoreResult<Option<AuditResult>> {
        Ok(self.lock().results.get(job_id).cloned())
    }
}

#[async_trait]
impl ProofStore for InMemoryStore {
    async fn insert_proof(&self, proof: ComplianceProof) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.writes.push(Write::InsertProof(proof.job_id.clone()));
        inner.proofs.push(proof);
        Ok(())
    }

    async fn list_proofs(&self, job_id: &JobId) -> StoreResult<Vec<ComplianceProof>> {
        Ok(self
            .lock()
            .proofs
            .iter()
            .filter(|p| &p.job_id == job_id)
            .cloned()
            .collect())
    }
}
