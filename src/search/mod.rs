//! Log-search job lifecycle: authenticate, submit, poll until terminal, fetch.
//!
//! The backend runs searches asynchronously, so callers only see
//! [`run_search`]; the transport details live behind [`SearchBackend`].

pub mod splunk;

use crate::config::SearchConfig;
use crate::error::{AgentError, Result};
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub use splunk::SplunkClient;

/// Session token returned by login. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(****)")
    }
}

/// Backend-reported lifecycle stage of a search job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DispatchState {
    Queued,
    Parsing,
    Running,
    Finalizing,
    Paused,
    Done,
    Failed,
    Other(String),
}

impl DispatchState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => DispatchState::Queued,
            "PARSING" => DispatchState::Parsing,
            "RUNNING" => DispatchState::Running,
            "FINALIZING" => DispatchState::Finalizing,
            "PAUSED" => DispatchState::Paused,
            "DONE" => DispatchState::Done,
            "FAILED" => DispatchState::Failed,
            other => DispatchState::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Done | DispatchState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchJob {
    pub id: String,
    pub query: String,
    pub state: JobState,
}

/// Ordered log records produced by one finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    pub records: Vec<serde_json::Value>,
}

impl ResultSet {
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Raw text of the first record: its `_raw` field, or the whole record
    /// serialized when that field is absent.
    pub fn first_raw_text(&self) -> Option<String> {
        let first = self.records.first()?;
        match first.get("_raw").and_then(|v| v.as_str()) {
            Some(raw) if !raw.trim().is_empty() => Some(raw.to_string()),
            _ => Some(first.to_string()),
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn login(&self) -> anyhow::Result<SessionToken>;

    /// Returns `None` when the backend accepted the request but gave no job id.
    async fn submit(&self, token: &SessionToken, query: &str) -> anyhow::Result<Option<String>>;

    async fn poll(&self, token: &SessionToken, job_id: &str) -> anyhow::Result<DispatchState>;

    async fn fetch(&self, token: &SessionToken, job_id: &str) -> anyhow::Result<ResultSet>;
}

/// How long and how patiently to wait for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Consecutive poll transport errors tolerated before giving up.
    pub max_transport_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_wait: config.max_wait(),
            max_transport_retries: config.max_transport_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Run the whole protocol for one query. A login failure stops before any
/// job is submitted.
pub async fn run_search(
    backend: &dyn SearchBackend,
    query: &str,
    policy: &PollPolicy,
) -> Result<ResultSet> {
    let token = backend.login().await.map_err(|e| {
        tracing::warn!("search backend login failed: {:#}", e);
        AgentError::Authentication(truncate(&format!("{:#}", e), 200))
    })?;

    let job_id = backend
        .submit(&token, query)
        .await
        .map_err(|e| AgentError::Submission(truncate(&format!("{:#}", e), 200)))?
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AgentError::Submission("the backend returned no job id".to_string()))?;

    let mut job = SearchJob {
        id: job_id,
        query: query.to_string(),
        state: JobState::Submitted,
    };
    tracing::info!(job_id = %job.id, "submitted search job");

    wait_for_job(backend, &token, &mut job, policy).await?;

    let results = backend
        .fetch(&token, &job.id)
        .await
        .map_err(|e| AgentError::Search(format!("fetching results for job {}: {:#}", job.id, e)))?;
    tracing::info!(job_id = %job.id, records = results.len(), "fetched search results");
    Ok(results)
}

/// Poll until the job reaches a terminal state. Non-terminal states keep
/// polling at `interval`; transport errors back off and are capped; the
/// whole wait is capped by `max_wait`.
async fn wait_for_job(
    backend: &dyn SearchBackend,
    token: &SessionToken,
    job: &mut SearchJob,
    policy: &PollPolicy,
) -> Result<()> {
    let started = Instant::now();
    let mut consecutive_errors = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        let pause = match backend.poll(token, &job.id).await {
            Ok(DispatchState::Done) => {
                job.state = JobState::Done;
                return Ok(());
            }
            Ok(DispatchState::Failed) => {
                job.state = JobState::Failed;
                return Err(AgentError::Search(format!(
                    "job {} was reported as FAILED by the backend",
                    job.id
                )));
            }
            Ok(state) => {
                tracing::debug!(job_id = %job.id, ?state, "job not finished");
                job.state = JobState::Running;
                consecutive_errors = 0;
                backoff = policy.initial_backoff;
                policy.interval
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors > policy.max_transport_retries {
                    return Err(AgentError::Search(format!(
                        "lost contact with job {} after {} failed polls: {:#}",
                        job.id, consecutive_errors, err
                    )));
                }
                tracing::warn!(
                    job_id = %job.id,
                    "poll failed ({:#}); retrying in {:?} ({}/{})",
                    err,
                    backoff,
                    consecutive_errors,
                    policy.max_transport_retries
                );
                let pause = backoff;
                backoff = backoff.saturating_mul(2);
                pause
            }
        };

        if started.elapsed() + pause > policy.max_wait {
            return Err(AgentError::Timeout {
                job_id: job.id.clone(),
                waited_secs: started.elapsed().as_secs(),
            });
        }
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBackend;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(5),
            max_transport_retries: 2,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_fetch_only_after_terminal_poll() {
        for n in [0usize, 1, 3] {
            let backend = StubBackend::running_for(n);
            let results = run_search(&backend, "search x", &fast_policy())
                .await
                .unwrap();
            assert_eq!(results.len(), 1);
            let calls = backend.calls();
            assert_eq!(calls.polls, n + 1, "polls for n={}", n);
            assert_eq!(calls.fetches, 1);
            assert_eq!(
                calls.log.last().map(String::as_str),
                Some("fetch"),
                "fetch must be the last call"
            );
            let first_fetch = calls.log.iter().position(|c| c == "fetch").unwrap();
            assert_eq!(first_fetch, 2 + n + 1);
        }
    }

    #[tokio::test]
    async fn test_login_failure_stops_pipeline() {
        let backend = StubBackend::login_fails();
        let err = run_search(&backend, "search x", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Authentication(_)));
        let calls = backend.calls();
        assert_eq!(calls.submits, 0);
        assert_eq!(calls.polls, 0);
        assert_eq!(calls.fetches, 0);
    }

    #[tokio::test]
    async fn test_missing_job_id_is_submission_failure() {
        let backend = StubBackend::no_job_id();
        let err = run_search(&backend, "search x", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Submission(_)));
        assert_eq!(backend.calls().polls, 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_search_error() {
        let backend =
            StubBackend::with_states(vec![Ok(DispatchState::Running), Ok(DispatchState::Failed)]);
        let err = run_search(&backend, "search x", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Search(_)));
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried_then_recover() {
        let backend = StubBackend::with_states(vec![
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Ok(DispatchState::Done),
        ]);
        let results = run_search(&backend, "search x", &fast_policy()).await;
        assert!(results.is_ok());
        assert_eq!(backend.calls().polls, 3);
    }

    #[tokio::test]
    async fn test_transport_errors_are_capped() {
        let backend = StubBackend::with_states(vec![
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Ok(DispatchState::Done),
        ]);
        let err = run_search(&backend, "search x", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Search(_)));
        assert!(err.to_string().contains("lost contact"));
        assert_eq!(backend.calls().polls, 3);
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_never_finishing_job_times_out() {
        let backend = StubBackend::running_for(usize::MAX);
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: Duration::from_millis(40),
            ..fast_policy()
        };
        let err = run_search(&backend, "search x", &policy).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
        assert_eq!(backend.calls().fetches, 0);
    }

    #[test]
    fn test_dispatch_state_parse() {
        assert_eq!(DispatchState::parse("DONE"), DispatchState::Done);
        assert_eq!(DispatchState::parse("running"), DispatchState::Running);
        assert!(DispatchState::parse("FAILED").is_terminal());
        assert!(!DispatchState::parse("QUEUED").is_terminal());
        assert_eq!(
            DispatchState::parse("WEIRD"),
            DispatchState::Other("WEIRD".into())
        );
    }

    #[test]
    fn test_first_raw_text_prefers_raw_field() {
        let set = ResultSet::new(vec![
            serde_json::json!({"_raw": "NPE at Foo.java:42", "host": "a"}),
        ]);
        assert_eq!(set.first_raw_text().as_deref(), Some("NPE at Foo.java:42"));
    }

    #[test]
    fn test_first_raw_text_falls_back_to_serialized_record() {
        let set = ResultSet::new(vec![serde_json::json!({"status": "500"})]);
        assert_eq!(set.first_raw_text().as_deref(), Some(r#"{"status":"500"}"#));
        assert!(ResultSet::default().first_raw_text().is_none());
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("abc123");
        assert!(!format!("{:?}", token).contains("abc123"));
        assert_eq!(token.expose(), "abc123");
    }
}
