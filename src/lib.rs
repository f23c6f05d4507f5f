//! logmedic library crate
//!
//! Operator questions become log searches, search results become diagnoses,
//! and a confirmed diagnosis becomes a patched branch and a pull request.
//! The binary in `main.rs` is a thin CLI over [`router::Agent`].

pub mod config;
pub mod diagnose;
pub mod error;
pub mod git_ops;
pub mod github;
pub mod keyring;
pub mod llm;
pub mod logging;
pub mod query;
pub mod remediation;
pub mod router;
pub mod search;
pub mod session;
pub mod timerange;
pub mod util;

#[cfg(test)]
mod testing;
