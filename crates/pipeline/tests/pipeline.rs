use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audit_analyzer::report::{parse_report, ReportOutcome};
use audit_analyzer::{
    AnalysisOutput, Analyzer, AnalyzerConfig, AnalyzerError, FailureReason, SlitherInvoker,
};
use audit_core::{
    AuditResult, Job, JobId, JobSource, JobStatus, JobUpdate, PipelineStage, SeverityCounts,
};
use audit_pipeline::{report_key, Orchestrator, PipelineConfig, RunOutcome};
use audit_storage::memory::Write;
use audit_storage::{ArtifactStore, InMemoryStore, JobStore, ResultStore, StoreError, StoreResult};
use tempfile::TempDir;

const REPORT: &str = r#"{"success":true,"error":null,"results":{"detectors":[
{"check":"reentrancy-eth","impact":"High","description":"a","elements":[]},
{"check":"arbitrary-send","impact":"High","description":"b","elements":[]},
{"check":"timestamp","impact":"Medium","description":"c","elements":[]},
{"check":"custom","description":"d","elements":[]}
]}}"#;

enum Behavior {
    Report,
    /// Reports on the first call, exits non-zero afterwards.
    ReportOnce,
    ExitFailure,
    BadOutput,
}

/// Analyzer double: records the paths it was handed.
struct FakeAnalyzer {
    behavior: Behavior,
    delay: Duration,
    seen: Mutex<Vec<PathBuf>>,
}

impl FakeAnalyzer {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn run_analysis(
        &self,
        source: &std::path::Path,
        _config: &AnalyzerConfig,
    ) -> Result<AnalysisOutput, AnalyzerError> {
        assert!(source.is_file(), "source not materialized: {}", source.display());
        self.seen.lock().unwrap().push(source.to_path_buf());
        tokio::time::sleep(self.delay).await;
        let calls = self.seen.lock().unwrap().len();
        let exits_non_zero = match self.behavior {
            Behavior::ExitFailure => true,
            Behavior::ReportOnce => calls > 1,
            Behavior::Report | Behavior::BadOutput => false,
        };
        if exits_non_zero {
            return Err(AnalyzerError::AnalysisFailed {
                reason: FailureReason::ExitStatus(Some(1)),
                stderr: "Error: compilation failed".into(),
            });
        }
        if let Behavior::BadOutput = self.behavior {
            return Err(AnalyzerError::OutputParseFailed {
                path: source.with_extension("analysis.json"),
                detail: "expected value at line 1".into(),
            });
        }
        let ReportOutcome::Findings(findings) = parse_report(REPORT.as_bytes()).unwrap() else {
            unreachable!()
        };
        Ok(AnalysisOutput {
            findings,
            raw_output: REPORT.as_bytes().to_vec(),
            exit_code: Some(0),
            duration_ms: 1,
        })
    }
}

/// Job store that can refuse the final `completed` flip.
struct FlakyJobs {
    inner: Arc<InMemoryStore>,
    fail_completion: AtomicBool,
}

#[async_trait]
impl JobStore for FlakyJobs {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StoreResult<Job> {
        if update.status == Some(JobStatus::Completed) && self.fail_completion.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database unavailable".into()));
        }
        self.inner.update_job(id, update).await
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        self.inner.list_unfinished().await
    }
}

/// Artifact store that refuses report uploads.
struct ReadOnlyReports {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl ArtifactStore for ReadOnlyReports {
    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        if path.starts_with("reports/") {
            return Err(StoreError::Backend("bucket is read-only".into()));
        }
        self.inner.put_blob(path, bytes).await
    }

    async fn get_blob(&self, url: &str) -> StoreResult<Vec<u8>> {
        self.inner.get_blob(url).await
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    analyzer: Arc<FakeAnalyzer>,
    orchestrator: Arc<Orchestrator>,
    work_root: TempDir,
}

fn config(work_root: &TempDir) -> PipelineConfig {
    PipelineConfig {
        work_root: work_root.path().to_path_buf(),
        analyzer: AnalyzerConfig::new(30),
    }
}

fn harness(analyzer: FakeAnalyzer) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let analyzer = Arc::new(analyzer);
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        analyzer.clone(),
        config(&work_root),
    ));
    Harness {
        store,
        analyzer,
        orchestrator,
        work_root,
    }
}

async fn upload_job(store: &InMemoryStore, source: &str) -> JobId {
    let id = JobId::new();
    let artifact_ref = store
        .put_blob(&format!("contracts/{id}.sol"), source.as_bytes().to_vec())
        .await
        .unwrap();
    store
        .insert_job(Job::with_id(
            id.clone(),
            JobSource::Upload {
                artifact_ref,
                file_name: "Vault.sol".into(),
            },
        ))
        .await
        .unwrap();
    id
}

fn expected_counts() -> SeverityCounts {
    [("High", 2), ("Medium", 1), ("Unknown", 1)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn work_root_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn successful_job_completes_with_tallied_result() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = upload_job(&h.store, "contract Vault {}").await;

    let outcome = h.orchestrator.run_job(&id).await;

    let RunOutcome::Completed(result) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(result.severity_counts, expected_counts());
    assert_eq!(result.report_ref, InMemoryStore::url_for(&report_key(&id)));

    let job = h.store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pipeline_stage, PipelineStage::Completed);
    assert_eq!(h.store.get_result(&id).await.unwrap(), Some(result.clone()));
    assert_eq!(h.store.get_blob(&result.report_ref).await.unwrap(), REPORT.as_bytes());
    assert!(work_root_is_empty(&h.work_root));
}

#[tokio::test]
async fn stages_are_written_in_order() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = upload_job(&h.store, "contract Vault {}").await;

    h.orchestrator.run_job(&id).await;

    assert_eq!(
        h.store.job_updates(&id),
        vec![
            JobUpdate::stage(PipelineStage::Downloading),
            JobUpdate::stage(PipelineStage::Analyzing),
            JobUpdate::stage(PipelineStage::UploadingReport),
            JobUpdate::stage(PipelineStage::Finalizing),
            JobUpdate::terminal(JobStatus::Completed, PipelineStage::Completed),
        ]
    );
}

#[tokio::test]
async fn result_is_written_before_completion() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = upload_job(&h.store, "contract Vault {}").await;

    h.orchestrator.run_job(&id).await;

    let writes = h.store.writes();
    let result_at = writes
        .iter()
        .position(|w| *w == Write::InsertResult(id.clone()))
        .unwrap();
    let completed_at = writes
        .iter()
        .position(|w| {
            matches!(w, Write::UpdateJob(j, u) if *j == id && u.status == Some(JobStatus::Completed))
        })
        .unwrap();
    assert!(result_at < completed_at);
}

#[tokio::test]
async fn analyzer_failure_marks_analysis_error_without_result() {
    let h = harness(FakeAnalyzer::new(Behavior::ExitFailure));
    let id = upload_job(&h.store, "contract Broken {").await;

    let outcome = h.orchestrator.run_job(&id).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            stage: PipelineStage::AnalysisError,
            ..
        }
    ));
    let job = h.store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.pipeline_stage, PipelineStage::AnalysisError);
    assert_eq!(h.store.get_result(&id).await.unwrap(), None);
    assert!(!h.store.blob_paths().contains(&report_key(&id)));
    assert!(work_root_is_empty(&h.work_root));
}

#[tokio::test]
async fn unparseable_output_marks_parse_error() {
    let h = harness(FakeAnalyzer::new(Behavior::BadOutput));
    let id = upload_job(&h.store, "contract Vault {}").await;

    h.orchestrator.run_job(&id).await;

    let job = h.store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.pipeline_stage, PipelineStage::ParseError);
    assert_eq!(h.store.get_result(&id).await.unwrap(), None);
}

#[tokio::test]
async fn missing_artifact_marks_download_error_and_cleans_up() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = JobId::new();
    h.store
        .insert_job(Job::with_id(
            id.clone(),
            JobSource::Upload {
                artifact_ref: InMemoryStore::url_for("contracts/gone.sol"),
                file_name: "gone.sol".into(),
            },
        ))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(&id).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            stage: PipelineStage::DownloadError,
            ..
        }
    ));
    assert_eq!(h.store.get_job(&id).await.unwrap().status, JobStatus::Error);
    assert!(h.analyzer.seen().is_empty());
    assert!(work_root_is_empty(&h.work_root));
}

#[tokio::test]
async fn address_job_fails_at_download() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let job = Job::new_pending(JobSource::Address {
        address: "0x52908400098527886E0F7030069857D2E4169EE7".into(),
        chain: None,
    });
    let id = job.id.clone();
    h.store.insert_job(job).await.unwrap();

    h.orchestrator.run_job(&id).await;

    let job = h.store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.pipeline_stage, PipelineStage::DownloadError);
    assert!(h.analyzer.seen().is_empty());
}

#[tokio::test]
async fn terminal_job_is_left_alone() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = upload_job(&h.store, "contract Vault {}").await;
    h.orchestrator.run_job(&id).await;
    let writes_before = h.store.writes();

    let outcome = h.orchestrator.run_job(&id).await;

    assert_eq!(outcome, RunOutcome::AlreadyTerminal(JobStatus::Completed));
    assert_eq!(h.store.writes(), writes_before);
    assert_eq!(h.analyzer.seen().len(), 1);
}

#[tokio::test]
async fn failed_job_is_not_retried() {
    let h = harness(FakeAnalyzer::new(Behavior::ExitFailure));
    let id = upload_job(&h.store, "contract Vault {}").await;
    h.orchestrator.run_job(&id).await;

    let outcome = h.orchestrator.run_job(&id).await;

    assert_eq!(outcome, RunOutcome::AlreadyTerminal(JobStatus::Error));
    assert_eq!(h.analyzer.seen().len(), 1);
}

#[tokio::test]
async fn interrupted_job_adopts_matching_result() {
    let h = harness(FakeAnalyzer::new(Behavior::Report));
    let id = upload_job(&h.store, "contract Vault {}").await;
    // Earlier attempt got as far as inserting its result.
    h.store
        .update_job(&id, JobUpdate::stage(PipelineStage::Finalizing))
        .await
        .unwrap();
    let earlier = AuditResult {
        job_id: id.clone(),
        severity_counts: expected_counts(),
        report_ref: InMemoryStore::url_for(&report_key(&id)),
        completed_at_ms: 7,
    };
    h.store.insert_result(earlier.clone()).await.unwrap();

    let outcome = h.orchestrator.run_job(&id).await;

    assert_eq!(outcome, RunOutcome::Completed(earlier.clone()));
    assert_eq!(h.store.get_job(&id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(h.store.get_result(&id).await.unwrap(), Some(earlier));
}

#[tokio::test]
async fn recorded_result_completes_job_without_rerunning() {
    let h = harness(FakeAnalyzer::new(Behavior::ExitFailure));
    let id = upload_job(&h.store, "contract Vault {}").await;
    let recorded = AuditResult {
        job_id: id.clone(),
        severity_counts: SeverityCounts::new(),
        report_ref: "mem://elsewhere.json".into(),
        completed_at_ms: 1,
    };
    h.store.insert_result(recorded.clone()).await.unwrap();

    let outcome = h.orchestrator.run_job(&id).await;

    assert_eq!(outcome, RunOutcome::Completed(recorded));
    assert!(h.analyzer.seen().is_empty());
    let job = h.store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pipeline_stage, PipelineStage::Completed);
}

#[tokio::test]
async fn report_upload_failure_marks_upload_error() {
    let store = Arc::new(InMemoryStore::new());
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(ReadOnlyReports {
            inner: store.clone(),
        }),
        store.clone(),
        Arc::new(FakeAnalyzer::new(Behavior::Report)),
        config(&work_root),
    );
    let id = upload_job(&store, "contract Vault {}").await;

    orchestrator.run_job(&id).await;

    let job = store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.pipeline_stage, PipelineStage::UploadError);
    assert_eq!(store.get_result(&id).await.unwrap(), None);
}

#[tokio::test]
async fn failed_completion_flip_leaves_job_resumable() {
    let store = Arc::new(InMemoryStore::new());
    let jobs = Arc::new(FlakyJobs {
        inner: store.clone(),
        fail_completion: AtomicBool::new(true),
    });
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        jobs.clone(),
        store.clone(),
        store.clone(),
        Arc::new(FakeAnalyzer::new(Behavior::Report)),
        config(&work_root),
    );
    let id = upload_job(&store, "contract Vault {}").await;

    let outcome = orchestrator.run_job(&id).await;

    assert!(matches!(outcome, RunOutcome::Incomplete { .. }), "{outcome:?}");
    let job = store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.pipeline_stage, PipelineStage::Finalizing);
    assert!(store.get_result(&id).await.unwrap().is_some());

    jobs.fail_completion.store(false, Ordering::SeqCst);
    let outcome = orchestrator.run_job(&id).await;

    assert!(matches!(outcome, RunOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(store.get_job(&id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn retry_after_failed_flip_completes_even_if_analyzer_now_fails() {
    let store = Arc::new(InMemoryStore::new());
    let jobs = Arc::new(FlakyJobs {
        inner: store.clone(),
        fail_completion: AtomicBool::new(true),
    });
    let analyzer = Arc::new(FakeAnalyzer::new(Behavior::ReportOnce));
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        jobs.clone(),
        store.clone(),
        store.clone(),
        analyzer.clone(),
        config(&work_root),
    );
    let id = upload_job(&store, "contract Vault {}").await;

    let first = orchestrator.run_job(&id).await;
    assert!(matches!(first, RunOutcome::Incomplete { .. }), "{first:?}");

    jobs.fail_completion.store(false, Ordering::SeqCst);
    let second = orchestrator.run_job(&id).await;

    assert!(matches!(second, RunOutcome::Completed(_)), "{second:?}");
    assert_eq!(analyzer.seen().len(), 1);
    let job = store.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pipeline_stage, PipelineStage::Completed);
}

/// Records a result for the job (as an overlapping run would) and then fails.
struct OverlappedAnalyzer {
    store: Arc<InMemoryStore>,
    result: AuditResult,
}

#[async_trait]
impl Analyzer for OverlappedAnalyzer {
    async fn run_analysis(
        &self,
        _source: &std::path::Path,
        _config: &AnalyzerConfig,
    ) -> Result<AnalysisOutput, AnalyzerError> {
        self.store.insert_result(self.result.clone()).await.unwrap();
        Err(AnalyzerError::AnalysisFailed {
            reason: FailureReason::ExitStatus(Some(1)),
            stderr: String::new(),
        })
    }
}

#[tokio::test]
async fn failing_run_completes_job_when_overlapping_run_recorded_result() {
    let store = Arc::new(InMemoryStore::new());
    let id = upload_job(&store, "contract Vault {}").await;
    let recorded = AuditResult {
        job_id: id.clone(),
        severity_counts: expected_counts(),
        report_ref: InMemoryStore::url_for(&report_key(&id)),
        completed_at_ms: 3,
    };
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(OverlappedAnalyzer {
            store: store.clone(),
            result: recorded.clone(),
        }),
        config(&work_root),
    );

    let outcome = orchestrator.run_job(&id).await;

    assert_eq!(outcome, RunOutcome::Completed(recorded));
    assert_eq!(store.get_job(&id).await.unwrap().status, JobStatus::Completed);
    assert!(!store.writes().iter().any(|w| matches!(
        w,
        Write::UpdateJob(_, update) if update.status == Some(JobStatus::Error)
    )));
}

#[tokio::test]
async fn concurrent_jobs_use_distinct_paths() {
    let mut analyzer = FakeAnalyzer::new(Behavior::Report);
    analyzer.delay = Duration::from_millis(20);
    let h = harness(analyzer);

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(upload_job(&h.store, "contract Vault {}").await);
    }
    let handles: Vec<_> = ids
        .iter()
        .map(|id| h.orchestrator.start_job(id.clone()))
        .collect();
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), RunOutcome::Completed(_)));
    }

    let mut seen = h.analyzer.seen();
    assert_eq!(seen.len(), ids.len());
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), ids.len(), "two jobs shared a source path");

    let reports: Vec<String> = h
        .store
        .blob_paths()
        .into_iter()
        .filter(|p| p.starts_with("reports/"))
        .collect();
    assert_eq!(reports.len(), ids.len());
    assert!(work_root_is_empty(&h.work_root));
}

#[tokio::test]
async fn end_to_end_with_subprocess_analyzer() {
    let store = Arc::new(InMemoryStore::new());
    let work_root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(SlitherInvoker::new()),
        PipelineConfig {
            work_root: work_root.path().to_path_buf(),
            analyzer: AnalyzerConfig {
                program: "sh".into(),
                solc_version: None,
                timeout_secs: 10,
                extra_args: vec![],
            },
        },
    );
    // The "contract" is a script that emits the report to the path in $2.
    let script = format!("cat > \"$2\" <<'JSON'\n{REPORT}\nJSON\n");
    let id = upload_job(&store, &script).await;

    let outcome = orchestrator.run_job(&id).await;

    let RunOutcome::Completed(result) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(result.severity_counts, expected_counts());
    assert!(work_root_is_empty(&work_root));
}
