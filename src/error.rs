//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant maps to one user-facing failure kind. The `Display` text is
//! what the current turn shows the operator, so it stays short and free of
//! secrets.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Log search authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to submit log search: {0}")]
    Submission(String),

    #[error("Log search failed: {0}")]
    Search(String),

    #[error("Log search did not finish within {waited_secs}s (job {job_id})")]
    Timeout { job_id: String, waited_secs: u64 },

    #[error("Could not read the suggested fix: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("Version control step failed: {0}")]
    Upstream(String),

    #[error("Language model call failed: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Serializable discriminant for [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Submission,
    Search,
    Timeout,
    Parse,
    Validation,
    Upstream,
    Model,
    Config,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Authentication(_) => ErrorKind::Authentication,
            AgentError::Submission(_) => ErrorKind::Submission,
            AgentError::Search(_) => ErrorKind::Search,
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::Parse(_) => ErrorKind::Parse,
            AgentError::Validation(_) => ErrorKind::Validation,
            AgentError::Upstream(_) => ErrorKind::Upstream,
            AgentError::Model(_) => ErrorKind::Model,
            AgentError::Config(_) => ErrorKind::Config,
        }
    }

    /// Wrap a git/HTTP plumbing failure, keeping the whole context chain.
    pub fn upstream(err: anyhow::Error) -> Self {
        AgentError::Upstream(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            AgentError::Authentication("401".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            AgentError::Timeout {
                job_id: "1".into(),
                waited_secs: 5
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_upstream_keeps_context_chain() {
        let err = anyhow::anyhow!("exit code 128").context("git push failed");
        let wrapped = AgentError::upstream(err);
        let text = wrapped.to_string();
        assert!(text.contains("git push failed"));
        assert!(text.contains("exit code 128"));
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = AgentError::Validation("Please provide a valid GitHub repo URL.".into());
        assert_eq!(err.to_string(), "Please provide a valid GitHub repo URL.");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Upstream).unwrap();
        assert_eq!(json, "\"upstream\"");
    }
}
