//! Persistence boundary for the audit pipeline: job records, audit results,
//! compliance proofs and artifact blobs.

pub mod error;
pub mod fs;
pub mod memory;
pub mod retry;
pub mod sqlite;
pub mod traits;

pub use error::*;
pub use fs::FsArtifactStore;
pub use memory::InMemoryStore;
pub use retry::{RetryPolicy, Retrying};
pub use sqlite::SqliteStore;
pub use traits::*;
