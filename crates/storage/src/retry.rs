use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use audit_core::{AuditResult, ComplianceProof, Job, JobId, JobUpdate};
use tracing::warn;

use crate::traits::{ArtifactStore, JobStore, ProofStore, ResultStore};
use crate::{StoreError, StoreResult};

/// Bounded retry for store calls. Every attempt is capped by `attempt_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Delay before the second attempt; doubles after each further failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }
}

/// Wraps a store so transient failures are retried with exponential backoff.
///
/// Non-transient errors (`NotFound`, `Conflict`, bad keys) surface immediately.
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn attempt<T, F, Fut>(&self, op: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StoreResult<T>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let res = match tokio::time::timeout(self.policy.attempt_timeout, call()).await {
                Ok(res) => res,
                Err(_) => Err(StoreError::Timeout(self.policy.attempt_timeout)),
            };
            match res {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(op, attempt, ?delay, error = %e, "store call failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: JobStore> JobStore for Retrying<S> {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        self.attempt("insert_job", || self.inner.insert_job(job.clone()))
            .await
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        self.attempt("get_job", || self.inner.get_job(id)).await
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StoreResult<Job> {
        self.attempt("update_job", || self.inner.update_job(id, update))
            .await
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        self.attempt("list_unfinished", || self.inner.list_unfinished())
            .await
    }
}

#[async_trait]
impl<S: ArtifactStore> ArtifactStore for Retrying<S> {
    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        self.attempt("put_blob", || self.inner.put_blob(path, bytes.clone()))
            .await
    }

    async fn get_blob(&self, url: &str) -> StoreResult<Vec<u8>> {
        self.attempt("get_blob", || self.inner.get_blob(url)).await
    }
}

#[async_trait]
impl<S: ResultStore> ResultStore for Retrying<S> {
    async fn insert_result(&self, result: AuditResult) -> StoreResult<()> {
        self.attempt("insert_result", || self.inner.insert_result(result.clone()))
            .await
    }

    async fn get_result(&self, job_id: &JobId) -> StoreResult<Option<AuditResult>> {
        self.attempt("get_result", || self.inner.get_result(job_id))
            .await
    }
}

#[async_trait]
impl<S: ProofStore> ProofStore for Retrying<S> {
    async fn insert_proof(&self, proof: ComplianceProof) -> StoreResult<()> {
        self.attempt("insert_proof", || self.inner.insert_proof(proof.clone()))
            .await
    }

    async fn list_proofs(&self, job_id: &JobId) -> StoreResult<Vec<ComplianceProof>> {
        self.attempt("list_proofs", || self.inner.list_proofs(job_id))
            .await
    }
}
