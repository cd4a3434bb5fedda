//! `auditd` internals: configuration, service wiring and the HTTP API.

pub mod config;
pub mod http;
pub mod services;

pub use config::Config;
pub use services::Services;
