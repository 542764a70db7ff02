//! Core pipeline for roster: identifier generation, liveness verification,
//! pooled distribution into groups with retry accounting.
//!
//! This crate is framework-agnostic. The remote subject service, group admin
//! checks, notifications and persistence live behind ports (traits) that
//! adapter crates implement.

pub mod config;
pub mod delivery;
pub mod domain;
pub mod dry_run;
pub mod errors;
pub mod generator;
pub mod groups;
pub mod logging;
pub mod notify;
pub mod pacing;
pub mod pipeline;
pub mod pool;
pub mod ports;
pub mod scheduler;
pub mod store;
pub mod verifier;

pub use errors::{Error, Result};
