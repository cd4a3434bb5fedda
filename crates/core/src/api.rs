//! Wire types shared by the daemon and `auditctl`. JSON field names are camelCase.

use serde::{Deserialize, Serialize};

use crate::{ComplianceProof, JobId, JobStatus, PipelineStage, SeverityCounts};

/// New audit submission: inline source upload or an on-chain address.
///
/// Uploads carry the source as a JSON string, so it must be UTF-8 (as solc
/// requires of Solidity sources anyway). A body naming both an upload and an
/// address, or carrying unknown fields, is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged, try_from = "RawSubmitRequest")]
pub enum SubmitRequest {
    Upload {
        #[serde(rename = "fileName")]
        file_name: String,
        source: String,
    },
    Address {
        #[serde(rename = "contractAddress")]
        contract_address: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawSubmitRequest {
    file_name: Option<String>,
    source: Option<String>,
    contract_address: Option<String>,
}

impl TryFrom<RawSubmitRequest> for SubmitRequest {
    type Error = String;

    fn try_from(raw: RawSubmitRequest) -> Result<Self, Self::Error> {
        match (raw.file_name, raw.source, raw.contract_address) {
            (Some(file_name), Some(source), None) => Ok(SubmitRequest::Upload { file_name, source }),
            (None, None, Some(contract_address)) => Ok(SubmitRequest::Address { contract_address }),
            (None, None, None) => Err("expected `fileName` and `source`, or `contractAddress`".into()),
            (_, _, Some(_)) => {
                Err("`contractAddress` cannot be combined with `fileName` or `source`".into())
            }
            _ => Err("uploads need both `fileName` and `source`".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Polling view of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusResponse {
    Pending {
        stage: PipelineStage,
    },
    Completed {
        #[serde(rename = "severityCounts")]
        severity_counts: SeverityCounts,
        #[serde(rename = "reportUrl")]
        report_url: String,
    },
    Error {
        stage: PipelineStage,
    },
}

impl StatusResponse {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusResponse::Pending { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest {
    pub job_id: JobId,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProveResponse {
    pub proof: ComplianceProof,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}
