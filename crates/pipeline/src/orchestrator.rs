use std::path::{Path, PathBuf};
use std::sync::Arc;

use audit_analyzer::{Analyzer, AnalyzerConfig};
use audit_core::{
    new_ulid, now_ms, tally_severities, AuditResult, Job, JobId, JobSource, JobStatus, JobUpdate,
    PipelineStage,
};
use audit_storage::{ArtifactStore, JobStore, ResultStore};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::workspace::{sanitize_component, JobWorkspace};
use crate::PipelineError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of every per-job scratch directory.
    pub work_root: PathBuf,
    pub analyzer: AnalyzerConfig,
}

/// How a single trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(AuditResult),
    Failed { stage: PipelineStage, error: String },
    /// The job was already terminal; nothing was written.
    AlreadyTerminal(JobStatus),
    /// The job stays non-terminal and may be triggered again.
    Incomplete { error: String },
    /// The job record could not be read.
    Unavailable { error: String },
}

/// Artifact key of the analyzer report for a job.
pub fn report_key(job_id: &JobId) -> String {
    format!("reports/{}/analyzer-output.json", sanitize_component(job_id.as_str()))
}

/// Sole writer of job status and stage, and sole creator of audit results.
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    results: Arc<dyn ResultStore>,
    analyzer: Arc<dyn Analyzer>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        results: Arc<dyn ResultStore>,
        analyzer: Arc<dyn Analyzer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            results,
            analyzer,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the job on its own task. The handle may be dropped.
    pub fn start_job(self: &Arc<Self>, job_id: JobId) -> JoinHandle<RunOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_job(&job_id).await })
    }

    /// Drives one job to a terminal state. Never returns an error: every
    /// failure becomes an error tag on the job (or leaves it resumable).
    pub async fn run_job(&self, job_id: &JobId) -> RunOutcome {
        let attempt = new_ulid();
        let span = info_span!("audit_job", job_id = %job_id, attempt = %attempt);
        self.run_attempt(job_id).instrument(span).await
    }

    async fn run_attempt(&self, job_id: &JobId) -> RunOutcome {
        let job = match self.jobs.get_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "cannot load job");
                return RunOutcome::Unavailable {
                    error: e.to_string(),
                };
            }
        };
        if job.status.is_terminal() {
            info!(status = %job.status, "job already terminal; nothing to do");
            return RunOutcome::AlreadyTerminal(job.status);
        }
        match self.results.get_result(job_id).await {
            Ok(Some(result)) => {
                info!("result already recorded; completing without rerunning");
                return self.complete(job_id, result).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "cannot check for an existing result");
                return RunOutcome::Unavailable {
                    error: e.to_string(),
                };
            }
        }
        if job.pipeline_stage != PipelineStage::Pending {
            info!(stage = %job.pipeline_stage, "restarting interrupted job from the beginning");
        }

        let mut workspace = None;
        let res = self.execute(&job, &mut workspace).await;
        if let Some(ws) = workspace.take() {
            ws.close();
        }

        match res {
            Ok(result) => self.complete(job_id, result).await,
            Err(e) => self.fail(job_id, e).await,
        }
    }

    async fn execute(
        &self,
        job: &Job,
        workspace: &mut Option<JobWorkspace>,
    ) -> Result<AuditResult, PipelineError> {
        self.enter_stage(&job.id, PipelineStage::Downloading).await?;
        let ws = JobWorkspace::create(&self.config.work_root, &job.id)
            .map_err(|e| PipelineError::SourceResolution(format!("create workspace: {e}")))?;
        let ws = workspace.insert(ws);
        let source_path = self.download(&job.source, ws.path()).await?;

        self.enter_stage(&job.id, PipelineStage::Analyzing).await?;
        let output = self
            .analyzer
            .run_analysis(&source_path, &self.config.analyzer)
            .await?;
        info!(
            findings = output.findings.len(),
            duration_ms = output.duration_ms,
            "analysis complete"
        );

        self.enter_stage(&job.id, PipelineStage::UploadingReport).await?;
        let report_ref = self
            .artifacts
            .put_blob(&report_key(&job.id), output.raw_output)
            .await
            .map_err(|source| PipelineError::StorageWrite {
                stage: PipelineStage::UploadingReport,
                source,
            })?;

        self.enter_stage(&job.id, PipelineStage::Finalizing).await?;
        let result = AuditResult {
            job_id: job.id.clone(),
            severity_counts: tally_severities(&output.findings),
            report_ref,
            completed_at_ms: now_ms(),
        };
        self.record_result(result).await
    }

    async fn enter_stage(&self, job_id: &JobId, stage: PipelineStage) -> Result<(), PipelineError> {
        info!(%stage, "entering stage");
        self.jobs
            .update_job(job_id, JobUpdate::stage(stage))
            .await
            .map(|_| ())
            .map_err(|source| PipelineError::StorageWrite { stage, source })
    }

    /// Materializes the contract source inside the workspace.
    async fn download(&self, source: &JobSource, dir: &Path) -> Result<PathBuf, PipelineError> {
        match source {
            JobSource::Upload {
                artifact_ref,
                file_name,
            } => {
                let bytes = self.artifacts.get_blob(artifact_ref).await.map_err(|e| {
                    PipelineError::SourceResolution(format!("fetch {artifact_ref}: {e}"))
                })?;
                let path = dir.join(local_file_name(file_name));
                tokio::fs::write(&path, &bytes).await.map_err(|e| {
                    PipelineError::SourceResolution(format!("write {}: {e}", path.display()))
                })?;
                Ok(path)
            }
            JobSource::Address { address, .. } => Err(PipelineError::SourceResolution(format!(
                "fetching on-chain source for {address} is not supported"
            ))),
        }
    }

    /// Inserts the result, adopting one left by an earlier attempt of this job.
    async fn record_result(&self, result: AuditResult) -> Result<AuditResult, PipelineError> {
        let err = match self.results.insert_result(result.clone()).await {
            Ok(()) => return Ok(result),
            Err(e) => e,
        };
        if !err.is_conflict() {
            return Err(PipelineError::StorageWrite {
                stage: PipelineStage::Finalizing,
                source: err,
            });
        }
        let existing = self
            .results
            .get_result(&result.job_id)
            .await
            .map_err(|source| PipelineError::StorageWrite {
                stage: PipelineStage::Finalizing,
                source,
            })?;
        match existing {
            Some(existing) => {
                if existing.report_ref != result.report_ref {
                    warn!(
                        existing = %existing.report_ref,
                        ours = %result.report_ref,
                        "another run recorded a result first; adopting it"
                    );
                } else {
                    info!("adopting result recorded by an earlier attempt");
                }
                Ok(existing)
            }
            None => Err(PipelineError::StorageWrite {
                stage: PipelineStage::Finalizing,
                source: err,
            }),
        }
    }

    async fn complete(&self, job_id: &JobId, result: AuditResult) -> RunOutcome {
        let update = JobUpdate::terminal(JobStatus::Completed, PipelineStage::Completed);
        match self.jobs.update_job(job_id, update).await {
            Ok(_) => {
                info!(severity_counts = ?result.severity_counts, "job completed");
                RunOutcome::Completed(result)
            }
            Err(e) => {
                let e = PipelineError::CompletionWrite(e);
                error!(error = %e, "job left in finalizing; trigger again to complete");
                RunOutcome::Incomplete {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn fail(&self, job_id: &JobId, err: PipelineError) -> RunOutcome {
        if let PipelineError::Analyzer(analyzer_err) = &err {
            if let Some(stderr) = analyzer_err.stderr() {
                warn!(%stderr, "analyzer stderr");
            }
        }
        let Some(tag) = err.failure_stage() else {
            error!(error = %err, "job left non-terminal");
            return RunOutcome::Incomplete {
                error: err.to_string(),
            };
        };
        if let Some(outcome) = self.complete_from_recorded(job_id, &err).await {
            return outcome;
        }
        error!(stage = %tag, error = %err, "job failed");
        let update = JobUpdate::terminal(JobStatus::Error, tag);
        if let Err(e) = self.jobs.update_job(job_id, update).await {
            // A concurrent run may have recorded its result in the meantime.
            if e.is_conflict() {
                if let Some(outcome) = self.complete_from_recorded(job_id, &err).await {
                    return outcome;
                }
            }
            error!(error = %e, "could not record failure");
            return RunOutcome::Incomplete {
                error: format!("{err}; recording failure: {e}"),
            };
        }
        RunOutcome::Failed {
            stage: tag,
            error: err.to_string(),
        }
    }

    /// A job with a recorded result is never marked `error`: completes it
    /// instead, or leaves it non-terminal when the result cannot be read.
    async fn complete_from_recorded(
        &self,
        job_id: &JobId,
        err: &PipelineError,
    ) -> Option<RunOutcome> {
        match self.results.get_result(job_id).await {
            Ok(Some(result)) => {
                warn!(error = %err, "run failed but a result is already recorded; completing");
                Some(self.complete(job_id, result).await)
            }
            Ok(None) => None,
            Err(e) => {
                error!(error = %e, "cannot check for an existing result");
                Some(RunOutcome::Incomplete {
                    error: format!("{err}; checking result: {e}"),
                })
            }
        }
    }
}

/// File name used inside the workspace. Keeps the base name only.
fn local_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| sanitize_component(&n.to_string_lossy()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "contract.sol".to_string());
    if base.ends_with(".sol") {
        base
    } else {
        format!("{base}.sol")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_key_is_job_scoped() {
        assert_eq!(
            report_key(&JobId::from_str("abc")),
            "reports/abc/analyzer-output.json"
        );
    }

    #[test]
    fn local_file_name_strips_directories() {
        assert_eq!(local_file_name("../../etc/Token.sol"), "Token.sol");
        assert_eq!(local_file_name("Token"), "Token.sol");
        assert_eq!(local_file_name(""), "contract.sol");
        assert_eq!(local_file_name(".."), "contract.sol");
    }
}
