//! Splunk REST API client (`/services/auth/login`, `/services/search/jobs`).

use super::{DispatchState, ResultSet, SearchBackend, SessionToken};
use crate::config::SearchConfig;
use crate::error::AgentError;
use crate::util::sanitize_error_body;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub struct SplunkClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    login_timeout: Duration,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionKey")]
    session_key: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    sid: Option<String>,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    #[serde(default)]
    entry: Vec<JobEntry>,
}

#[derive(Deserialize)]
struct JobEntry {
    content: JobContent,
}

#[derive(Deserialize)]
struct JobContent {
    #[serde(rename = "dispatchState")]
    dispatch_state: String,
}

#[derive(Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

impl SplunkClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        request_timeout: Duration,
        login_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> anyhow::Result<Self> {
        if accept_invalid_certs {
            tracing::warn!("TLS certificate validation is disabled for the search backend");
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            login_timeout,
        })
    }

    pub fn from_config(config: &SearchConfig) -> crate::error::Result<Self> {
        let missing = |name: &str| {
            AgentError::Config(format!("missing required setting `search.{}`", name))
        };
        Self::new(
            config.base_url.as_deref().ok_or_else(|| missing("base_url"))?,
            config.username.as_deref().ok_or_else(|| missing("username"))?,
            config.password.as_deref().ok_or_else(|| missing("password"))?,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.login_timeout_secs),
            config.accept_invalid_certs,
        )
        .map_err(|e| AgentError::Config(e.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_header(token: &SessionToken) -> String {
        format!("Splunk {}", token.expose())
    }
}

/// Read a response body, turning non-2xx into an error with a sanitized body.
async fn checked_body(response: reqwest::Response, what: &str) -> anyhow::Result<String> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow::anyhow!(
            "{} returned {}: {}",
            what,
            status,
            sanitize_error_body(&body)
        ));
    }
    Ok(body)
}

/// Session key from a JSON login reply, or from the XML `<sessionKey>` element
/// older instances send regardless of `output_mode`.
fn extract_session_key(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<LoginResponse>(body) {
        return parsed.session_key.filter(|k| !k.is_empty());
    }
    let start = body.find("<sessionKey>")? + "<sessionKey>".len();
    let end = body[start..].find("</sessionKey>")? + start;
    let key = body[start..end].trim();
    (!key.is_empty()).then(|| key.to_string())
}

#[async_trait]
impl SearchBackend for SplunkClient {
    async fn login(&self) -> anyhow::Result<SessionToken> {
        let url = self.url("/services/auth/login");
        tracing::debug!("logging in to search backend at {}", url);
        let response = self
            .http
            .post(&url)
            .timeout(self.login_timeout)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("output_mode", "json"),
            ])
            .send()
            .await
            .context("Failed to reach search backend")?;
        let body = checked_body(response, "login").await?;
        extract_session_key(&body)
            .map(SessionToken::new)
            .ok_or_else(|| anyhow::anyhow!("login response carried no session key"))
    }

    async fn submit(&self, token: &SessionToken, query: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .http
            .post(self.url("/services/search/jobs"))
            .header("Authorization", Self::auth_header(token))
            .form(&[("search", query), ("output_mode", "json")])
            .send()
            .await
            .context("Failed to submit search job")?;
        let body = checked_body(response, "job submission").await?;
        let parsed: SubmitResponse =
            serde_json::from_str(&body).context("Failed to parse job submission response")?;
        Ok(parsed.sid)
    }

    async fn poll(&self, token: &SessionToken, job_id: &str) -> anyhow::Result<DispatchState> {
        let response = self
            .http
            .get(self.url(&format!("/services/search/jobs/{}", job_id)))
            .header("Authorization", Self::auth_header(token))
            .query(&[("output_mode", "json")])
            .send()
            .await
            .context("Failed to poll search job")?;
        let body = checked_body(response, "job status").await?;
        let parsed: JobStatusResponse =
            serde_json::from_str(&body).context("Failed to parse job status response")?;
        let entry = parsed
            .entry
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("job status response had no entry"))?;
        Ok(DispatchState::parse(&entry.content.dispatch_state))
    }

    async fn fetch(&self, token: &SessionToken, job_id: &str) -> anyhow::Result<ResultSet> {
        let response = self
            .http
            .get(self.url(&format!("/services/search/jobs/{}/results", job_id)))
            .header("Authorization", Self::auth_header(token))
            .query(&[("output_mode", "json"), ("count", "0")])
            .send()
            .await
            .context("Failed to fetch search results")?;
        let body = checked_body(response, "job results").await?;
        let parsed: ResultsResponse =
            serde_json::from_str(&body).context("Failed to parse job results")?;
        Ok(ResultSet::new(parsed.results))
    }
}
