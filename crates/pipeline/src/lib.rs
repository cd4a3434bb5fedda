//! Audit job pipeline: drives a submitted job through download, analysis,
//! report upload and finalization, and exposes the read-side projections.

pub mod compliance;
pub mod error;
pub mod orchestrator;
pub mod status;
pub mod submit;
pub mod workspace;

pub use compliance::{ComplianceService, ProofError, DEFAULT_GATING_SEVERITY, PROOF_SCHEME};
pub use error::PipelineError;
pub use orchestrator::{report_key, Orchestrator, PipelineConfig, RunOutcome};
pub use status::{job_status, StatusError};
pub use submit::{validate_address, SubmissionGateway, SubmitError};
pub use workspace::JobWorkspace;
