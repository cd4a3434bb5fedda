//! Compliance attestation stub. Not a zero-knowledge proof: the payload is a
//! SHA-256 commitment over the inputs so the record is at least tamper-evident.

use std::sync::Arc;

use audit_core::{now_ms, ComplianceProof, JobId, ProofId, SeverityCounts};
use audit_storage::{ProofStore, ResultStore, StoreError};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_GATING_SEVERITY: &str = "Critical";
pub const PROOF_SCHEME: &str = "mock-sha256";

#[derive(Error, Debug)]
pub enum ProofError {
    #[error("threshold must be at least 1")]
    InvalidThreshold,

    #[error("no audit result for job {0}")]
    NoResult(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ComplianceService {
    results: Arc<dyn ResultStore>,
    proofs: Arc<dyn ProofStore>,
    gating_severity: String,
}

impl ComplianceService {
    pub fn new(
        results: Arc<dyn ResultStore>,
        proofs: Arc<dyn ProofStore>,
        gating_severity: impl Into<String>,
    ) -> Self {
        Self {
            results,
            proofs,
            gating_severity: gating_severity.into(),
        }
    }

    pub fn gating_severity(&self) -> &str {
        &self.gating_severity
    }

    /// Passes when the job has fewer than `threshold` findings at the gating
    /// severity. The proof is stored before it is returned.
    pub async fn generate_proof(
        &self,
        job_id: &JobId,
        threshold: u32,
    ) -> Result<ComplianceProof, ProofError> {
        if threshold == 0 {
            return Err(ProofError::InvalidThreshold);
        }
        let result = self
            .results
            .get_result(job_id)
            .await?
            .ok_or_else(|| ProofError::NoResult(job_id.clone()))?;

        let gated = result
            .severity_counts
            .get(&self.gating_severity)
            .copied()
            .unwrap_or(0);
        let passed = gated < u64::from(threshold);

        let proof = ComplianceProof {
            id: ProofId::new(),
            job_id: job_id.clone(),
            threshold,
            gating_severity: self.gating_severity.clone(),
            passed,
            scheme: PROOF_SCHEME.to_string(),
            proof: commitment(job_id, threshold, &self.gating_severity, &result.severity_counts)?,
            created_at_ms: now_ms(),
        };
        self.proofs.insert_proof(proof.clone()).await?;
        info!(job_id = %job_id, threshold, passed, "compliance proof stored");
        Ok(proof)
    }
}

/// Hex SHA-256 over the proof inputs. Counts serialize in key order, so equal
/// inputs always commit to the same digest.
pub fn commitment(
    job_id: &JobId,
    threshold: u32,
    gating_severity: &str,
    counts: &SeverityCounts,
) -> Result<String, ProofError> {
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(threshold.to_be_bytes());
    hasher.update(gating_severity.as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(counts).map_err(StoreError::from)?);
    Ok(hex::encode(hasher.finalize()))
}
