//! Runs the external static analyzer against one contract source and turns its
//! JSON report into findings.

pub mod config;
pub mod error;
pub mod invoker;
pub mod report;

pub use config::AnalyzerConfig;
pub use error::{AnalyzerError, FailureReason};
pub use invoker::{output_path_for, AnalysisOutput, Analyzer, SlitherInvoker};
