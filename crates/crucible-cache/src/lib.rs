//! The pipeline-aware cache (PAC): a probabilistic `(component, version)`
//! score model, updated from pipeline-submission history, used to pick the
//! cache entry least likely to recur for eviction (spec §4.F).
//!
//! This crate is pure math over `(major, minor)` version pairs — it knows
//! nothing about worker processes, manifests, or the filesystem. The
//! policy-agnostic worker pool front-end that wraps this alongside the LRU
//! / LFU / FIFO baselines lives one layer up.

mod config;
mod matrix;
mod pac;

pub use config::PacConfig;
pub use matrix::{all_tracked_versions, Version, VersionScoreMatrix, MAX_MAJOR_VERSION, MAX_MINOR_VERSION};
pub use pac::{CachedEntry, Pac, NO_CANDIDATE_SCORE};
