use std::sync::Arc;

use anyhow::{Context, Result};
use audit_analyzer::{Analyzer, SlitherInvoker};
use audit_pipeline::{ComplianceService, Orchestrator, PipelineConfig, SubmissionGateway};
use audit_storage::{
    ArtifactStore, FsArtifactStore, JobStore, ProofStore, ResultStore, Retrying, SqliteStore,
};
use tracing::{info, warn};

use crate::Config;

/// Everything the HTTP layer talks to.
pub struct Services {
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub gateway: SubmissionGateway,
    pub compliance: ComplianceService,
}

impl Services {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        results: Arc<dyn ResultStore>,
        proofs: Arc<dyn ProofStore>,
        analyzer: Arc<dyn Analyzer>,
        pipeline: PipelineConfig,
        gating_severity: &str,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&jobs),
            Arc::clone(&artifacts),
            Arc::clone(&results),
            analyzer,
            pipeline,
        ));
        let gateway = SubmissionGateway::new(
            Arc::clone(&jobs),
            artifacts,
            Arc::clone(&orchestrator),
        );
        let compliance = ComplianceService::new(Arc::clone(&results), proofs, gating_severity);
        Self {
            jobs,
            results,
            orchestrator,
            gateway,
            compliance,
        }
    }

    /// SQLite records and filesystem artifacts under the configured data dir,
    /// each behind the retry decorator.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let db_path = cfg.db_path();
        let db = SqliteStore::open(&db_path)
            .with_context(|| format!("open database {}", db_path.display()))?;
        let artifact_root = cfg.artifact_root();
        let artifacts = FsArtifactStore::open(&artifact_root)
            .with_context(|| format!("open artifact root {}", artifact_root.display()))?;
        let work_root = cfg.work_root();
        std::fs::create_dir_all(&work_root)
            .with_context(|| format!("create work root {}", work_root.display()))?;

        let policy = cfg.retry.policy();
        let db = Arc::new(Retrying::new(db, policy));
        info!(
            db = %db_path.display(),
            artifacts = %artifact_root.display(),
            work = %work_root.display(),
            "storage ready"
        );

        Ok(Self::new(
            db.clone(),
            Arc::new(Retrying::new(artifacts, policy)),
            db.clone(),
            db,
            Arc::new(SlitherInvoker::new()),
            PipelineConfig {
                work_root,
                analyzer: cfg.analyzer.clone(),
            },
            &cfg.compliance.gating_severity,
        ))
    }

    /// Triggers every job a previous process left `pending`.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let jobs = self
            .jobs
            .list_unfinished()
            .await
            .context("list unfinished jobs")?;
        for job in &jobs {
            warn!(job_id = %job.id, stage = %job.pipeline_stage, "resuming unfinished job");
            drop(self.orchestrator.start_job(job.id.clone()));
        }
        Ok(jobs.len())
    }
}
