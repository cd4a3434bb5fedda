use audit_analyzer::AnalyzerError;
use audit_core::PipelineStage;
use audit_storage::StoreError;
use thiserror::Error;

/// Why a pipeline run stopped. Never returned to whoever triggered the run;
/// the orchestrator turns it into a terminal error tag.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source resolution failed: {0}")]
    SourceResolution(String),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error("store write failed while {stage}: {source}")]
    StorageWrite {
        stage: PipelineStage,
        #[source]
        source: StoreError,
    },

    #[error("result recorded but completion flip failed: {0}")]
    CompletionWrite(#[source] StoreError),
}

impl PipelineError {
    /// Terminal tag to record, or `None` when the job must stay non-terminal.
    pub fn failure_stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::SourceResolution(_) => Some(PipelineStage::DownloadError),
            PipelineError::Analyzer(e) if e.is_parse_failure() => Some(PipelineStage::ParseError),
            PipelineError::Analyzer(_) => Some(PipelineStage::AnalysisError),
            PipelineError::StorageWrite { stage, .. } => Some(stage.failure_tag()),
            PipelineError::CompletionWrite(_) => None,
        }
    }
}
