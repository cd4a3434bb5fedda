#![forbid(unsafe_code)]

//! Shared models for the contract audit pipeline.

pub mod api;
pub mod ids;
pub mod model;
pub mod severity;

mod util;

pub use ids::*;
pub use model::*;
pub use severity::*;
pub use util::{new_ulid, now_ms, EpochMs};
