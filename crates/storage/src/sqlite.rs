use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use audit_core::{
    now_ms, AuditResult, ComplianceProof, Job, JobId, JobSource, JobStatus, JobUpdate,
    PipelineStage, ProofId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::traits::{JobStore, ProofStore, ResultStore};
use crate::{StoreError, StoreResult};

const JOB_COLUMNS: &str = "id, source_kind, artifact_ref, file_name, address, chain, status, \
                           pipeline_stage, created_at_ms, updated_at_ms";

/// Record store backed by a single SQLite connection.
///
/// Calls run on the blocking pool so the async runtime never waits on disk.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(include_str!("../migrations/0001_init.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

struct JobRow {
    id: String,
    source_kind: String,
    artifact_ref: Option<String>,
    file_name: Option<String>,
    address: Option<String>,
    chain: Option<String>,
    status: String,
    pipeline_stage: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_kind: row.get(1)?,
            artifact_ref: row.get(2)?,
            file_name: row.get(3)?,
            address: row.get(4)?,
            chain: row.get(5)?,
            status: row.get(6)?,
            pipeline_stage: row.get(7)?,
            created_at_ms: row.get(8)?,
            updated_at_ms: row.get(9)?,
        })
    }

    fn into_job(self) -> StoreResult<Job> {
        let corrupt = |what: &str| StoreError::Backend(format!("job {}: invalid {what}", self.id));
        let source = match (self.source_kind.as_str(), self.artifact_ref, self.address) {
            ("upload", Some(artifact_ref), None) => JobSource::Upload {
                artifact_ref,
                file_name: self.file_name.unwrap_or_default(),
            },
            ("address", None, Some(address)) => JobSource::Address {
                address,
                chain: self.chain,
            },
            _ => return Err(corrupt("source")),
        };
        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt("status"))?;
        let pipeline_stage =
            PipelineStage::parse(&self.pipeline_stage).ok_or_else(|| corrupt("pipeline_stage"))?;
        Ok(Job {
            id: JobId(self.id),
            source,
            status,
            pipeline_stage,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

fn select_job(conn: &Connection, id: &str) -> StoreResult<Option<Job>> {
    let row = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let (artifact_ref, file_name, address, chain) = match &job.source {
                JobSource::Upload {
                    artifact_ref,
                    file_name,
                } => (Some(artifact_ref.as_str()), Some(file_name.as_str()), None, None),
                JobSource::Address { address, chain } => {
                    (None, None, Some(address.as_str()), chain.as_deref())
                }
            };
            let res = conn.execute(
                &format!("INSERT INTO jobs({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    job.id.as_str(),
                    job.source.kind(),
                    artifact_ref,
                    file_name,
                    address,
                    chain,
                    job.status.as_str(),
                    job.pipeline_stage.as_str(),
                    job.created_at_ms,
                    job.updated_at_ms,
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::conflict("job", job.id.as_str(), e.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        let id = id.clone();
        self.with_conn(move |conn| {
            select_job(conn, id.as_str())?.ok_or_else(|| StoreError::not_found("job", id.as_str()))
        })
        .await
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StoreResult<Job> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current = select_job(&tx, id.as_str())?
                .ok_or_else(|| StoreError::not_found("job", id.as_str()))?;
            if current.status.is_terminal() {
                return Err(StoreError::conflict(
                    "job",
                    id.as_str(),
                    format!("status is terminal ({})", current.status),
                ));
            }
            if update.status == Some(JobStatus::Error) {
                let has_result: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM audit_results WHERE job_id = ?1)",
                    params![id.as_str()],
                    |row| row.get(0),
                )?;
                if has_result {
                    return Err(StoreError::conflict(
                        "job",
                        id.as_str(),
                        "a result is already recorded",
                    ));
                }
            }
            tx.execute(
                "UPDATE jobs SET status = COALESCE(?2, status), \
                 pipeline_stage = COALESCE(?3, pipeline_stage), updated_at_ms = ?4 \
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    id.as_str(),
                    update.status.map(|s| s.as_str()),
                    update.pipeline_stage.map(|s| s.as_str()),
                    now_ms(),
                ],
            )?;
            let updated = select_job(&tx, id.as_str())?
                .ok_or_else(|| StoreError::not_found("job", id.as_str()))?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' ORDER BY created_at_ms"
            ))?;
            let rows = stmt
                .query_map([], JobRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(JobRow::into_job).collect()
        })
        .await
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert_result(&self, result: AuditResult) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let counts = serde_json::to_string(&result.severity_counts)?;
            let res = conn.execute(
                "INSERT INTO audit_results(job_id, severity_counts, report_ref, completed_at_ms) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    result.job_id.as_str(),
                    counts,
                    result.report_ref,
                    result.completed_at_ms
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::conflict(
                    "audit_result",
                    result.job_id.as_str(),
                    e.to_string(),
                )),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_result(&self, job_id: &JobId) -> StoreResult<Option<AuditResult>> {
        let job_id = job_id.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT severity_counts, report_ref, completed_at_ms FROM audit_results WHERE job_id = ?1",
                    params![job_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(counts, report_ref, completed_at_ms)| {
                Ok(AuditResult {
                    job_id: job_id.clone(),
                    severity_counts: serde_json::from_str(&counts)?,
                    report_ref,
                    completed_at_ms,
                })
            })
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl ProofStore for SqliteStore {
    async fn insert_proof(&self, proof: ComplianceProof) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO compliance_proofs(id, job_id, threshold, gating_severity, passed, scheme, proof, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    proof.id.as_str(),
                    proof.job_id.as_str(),
                    proof.threshold,
                    proof.gating_severity,
                    proof.passed,
                    proof.scheme,
                    proof.proof,
                    proof.created_at_ms,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_proofs(&self, job_id: &JobId) -> StoreResult<Vec<ComplianceProof>> {
        let job_id = job_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, threshold, gating_severity, passed, scheme, proof, created_at_ms \
                 FROM compliance_proofs WHERE job_id = ?1 ORDER BY created_at_ms",
            )?;
            let proofs = stmt
                .query_map(params![job_id.as_str()], |row| {
                    Ok(ComplianceProof {
                        id: ProofId(row.get(0)?),
                        job_id: job_id.clone(),
                        threshold: row.get(1)?,
                        gating_severity: row.get(2)?,
                        passed: row.get(3)?,
                        scheme: row.get(4)?,
                        proof: row.get(5)?,
                        created_at_ms: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(proofs)
        })
        .await
    }
}
