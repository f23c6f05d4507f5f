//! Query dispatch: one operator message in, one [`Response`] out.
//!
//! A turn is either a remediation request (the message names a repository
//! while a fix is pending) or a fresh query. Fresh queries are rephrased with
//! the conversation as context, then the model either asks a clarifying
//! question or selects exactly one intent, which runs the search and the
//! diagnosis.

use crate::config::Config;
use crate::diagnose::diagnose;
use crate::error::{AgentError, ErrorKind, Result};
use crate::git_ops::GitWorkspace;
use crate::github::{extract_repo_url, mentions_repo_url, GitHubClient, RepoRef};
use crate::llm::tools::IntentArgs;
use crate::llm::{
    intent_tool_definitions, prompts, AzureChatClient, ChatModel, ChatRequest, Message, ToolCall,
};
use crate::query::{self, Intent};
use crate::remediation::{
    parse_diagnosis, Diagnosis, RemediationOutcome, RemediationSettings, Remediator,
};
use crate::search::{run_search, PollPolicy, ResultSet, SearchBackend, SplunkClient};
use crate::session::SessionContext;
use crate::timerange::{self, TimeWindow};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

const UNCLEAR_REQUEST: &str = "I couldn't tell what to look into. Which application should I check, and what should I look for (status, errors or null pointer exceptions)?";
const INVALID_REPO_URL: &str = "Please provide a valid GitHub repository URL \
     (https://github.com/owner/repo.git) to apply the fix.";

#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub intent: Intent,
    pub application: String,
    pub window: TimeWindow,
    pub query: String,
    pub results: ResultSet,
    pub diagnosis: String,
    /// Set when the diagnosis carried a usable fix, now pending.
    pub pending_fix: Option<Diagnosis>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Clarification { message: String },
    IntentResult(IntentOutcome),
    Remediation(RemediationOutcome),
    Error { kind: ErrorKind, message: String },
}

impl Response {
    fn clarification(message: impl Into<String>) -> Self {
        Response::Clarification {
            message: message.into(),
        }
    }

    fn error(err: &AgentError) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Plain-text form for the terminal.
    pub fn render(&self) -> String {
        match self {
            Response::Clarification { message } => message.clone(),
            Response::IntentResult(outcome) => {
                let mut out = format!(
                    "Ran `{}` for `{}` (earliest={}, latest={})\nQuery: {}\nRecords: {}\n\n{}",
                    outcome.intent,
                    outcome.application,
                    outcome.window.earliest,
                    outcome.window.latest,
                    outcome.query,
                    outcome.results.len(),
                    outcome.diagnosis
                );
                if let Some(fix) = &outcome.pending_fix {
                    out.push_str(&format!(
                        "\n\nA fix for `{}` (line {}) is ready. Send a GitHub repository URL to apply it and open a pull request.",
                        fix.file_path, fix.line_number
                    ));
                }
                out
            }
            Response::Remediation(outcome) => format!(
                "Fix applied and pull request created: {}\nBranch: {}\nCommit: {}",
                outcome.pull_request_url, outcome.branch, outcome.commit
            ),
            Response::Error { message, .. } => format!("Error: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub rephrase_temperature: f32,
    pub diagnosis_temperature: f32,
    pub poll: PollPolicy,
    /// Used when the operator asks to apply a fix without naming a repository.
    pub default_repo: Option<RepoRef>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            rephrase_temperature: 0.2,
            diagnosis_temperature: 0.4,
            poll: PollPolicy::default(),
            default_repo: None,
        }
    }
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn SearchBackend>,
    remediator: Remediator,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchBackend>,
        remediator: Remediator,
        settings: AgentSettings,
    ) -> Self {
        Self {
            model,
            search,
            remediator,
            settings,
        }
    }

    /// Wire the production collaborators from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let default_repo = match config.github.default_repo.as_deref() {
            Some(raw) => Some(default_repo_ref(raw, config.github.user.as_deref()).ok_or_else(
                || {
                    AgentError::Config(format!(
                        "`github.default_repo` is not a GitHub repository: {}",
                        raw
                    ))
                },
            )?),
            None => None,
        };

        let model: Arc<dyn ChatModel> = Arc::new(AzureChatClient::from_config(&config.model)?);
        let search: Arc<dyn SearchBackend> = Arc::new(SplunkClient::from_config(&config.search)?);
        let host = Arc::new(GitHubClient::from_config(&config.github)?);
        let workspace = GitWorkspace::new(&config.workspace.path, &config.github.clone_base);
        let remediator = Remediator::new(
            model.clone(),
            Box::new(workspace),
            host,
            RemediationSettings {
                base_branch: config.workspace.base_branch.clone(),
                refine_temperature: config.model.refine_temperature,
            },
        );

        Ok(Self::new(
            model,
            search,
            remediator,
            AgentSettings {
                rephrase_temperature: config.model.rephrase_temperature,
                diagnosis_temperature: config.model.diagnosis_temperature,
                poll: PollPolicy::from_config(&config.search),
                default_repo,
            },
        ))
    }

    /// Handle one operator message. Failures come back as
    /// [`Response::Error`]; the session stays usable for the next turn.
    pub async fn handle_message(&self, session: &mut SessionContext, text: &str) -> Response {
        let text = text.trim();
        if text.is_empty() {
            return Response::clarification(UNCLEAR_REQUEST);
        }

        if let Some(repo) = extract_repo_url(text) {
            return self.remediate(session, text, repo).await;
        }
        if session.has_pending_fix() {
            if mentions_repo_url(text) {
                return Response::error(&AgentError::Validation(INVALID_REPO_URL.to_string()));
            }
            if is_apply_confirmation(text) {
                if let Some(repo) = self.settings.default_repo.clone() {
                    return self.remediate(session, text, repo).await;
                }
            }
        }

        match self.dispatch(session, text).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(session = %session.id, "turn failed: {}", err);
                Response::error(&err)
            }
        }
    }

    async fn remediate(&self, session: &mut SessionContext, text: &str, repo: RepoRef) -> Response {
        tracing::info!(session = %session.id, repo = %repo, "remediation requested");
        match self.remediator.apply(session, &repo).await {
            Ok(outcome) => {
                session.conversation.push_user(text);
                session.conversation.push_assistant(format!(
                    "I applied the fix to `{}` in {} and opened {}.",
                    outcome.file_path, outcome.repository, outcome.pull_request_url
                ));
                Response::Remediation(outcome)
            }
            Err(err) => Response::error(&err),
        }
    }

    async fn rephrase(&self, session: &SessionContext, text: &str) -> Result<String> {
        let mut messages = vec![Message::system(prompts::REPHRASE_SYSTEM)];
        messages.extend(session.conversation.turns().iter().map(|t| t.message.clone()));
        messages.push(Message::user(prompts::rephrase_user(text)));

        let reply = self
            .model
            .complete(
                ChatRequest::new(messages).with_temperature(self.settings.rephrase_temperature),
            )
            .await
            .map_err(|e| AgentError::Model(format!("{:#}", e)))?;
        let rephrased = reply
            .text_content()
            .ok_or_else(|| AgentError::Model("the rephrasing reply was empty".to_string()))?
            .to_string();
        tracing::debug!(session = %session.id, rephrased = %rephrased, "rephrased message");
        Ok(rephrased)
    }

    async fn dispatch(&self, session: &mut SessionContext, text: &str) -> Result<Response> {
        let rephrased = self.rephrase(session, text).await?;
        session.conversation.push_user(rephrased);

        let request = ChatRequest::new(session.conversation.messages())
            .with_tools(intent_tool_definitions());
        let reply = self
            .model
            .complete(request)
            .await
            .map_err(|e| AgentError::Model(format!("{:#}", e)))?;

        // Text wins over tool calls: the model chose to talk.
        if let Some(content) = reply.text_content() {
            session.conversation.push_assistant(content);
            return Ok(Response::clarification(content));
        }

        match reply.tool_calls.as_slice() {
            [] => {
                session.conversation.push_assistant(UNCLEAR_REQUEST);
                Ok(Response::clarification(UNCLEAR_REQUEST))
            }
            [call] => self.execute(session, call).await,
            calls => {
                let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
                tracing::info!(session = %session.id, ?names, "rejected multiple tool calls");
                let question = format!(
                    "That request maps to several searches ({}). I run one at a time; which should I start with?",
                    names.join(", ")
                );
                session.conversation.push_assistant(question.clone());
                Ok(Response::clarification(question))
            }
        }
    }

    async fn execute(&self, session: &mut SessionContext, call: &ToolCall) -> Result<Response> {
        let intent = Intent::from_name(&call.function.name).ok_or_else(|| {
            AgentError::Validation(format!(
                "The model selected an unknown operation `{}`.",
                call.function.name
            ))
        })?;
        let args = IntentArgs::parse(&call.function.arguments).map_err(AgentError::Validation)?;
        let window = timerange::resolve(args.time_range.as_deref().unwrap_or_default());
        let query = query::generate(intent, &args.application_name, &window);
        tracing::info!(
            session = %session.id,
            %intent,
            application = %args.application_name,
            earliest = %window.earliest,
            latest = %window.latest,
            "executing intent"
        );

        let results = run_search(self.search.as_ref(), &query, &self.settings.poll).await?;
        let report = diagnose(
            self.model.as_ref(),
            &args.application_name,
            intent,
            &query,
            &results,
            self.settings.diagnosis_temperature,
        )
        .await?;

        let pending_fix = if report.from_model {
            match parse_diagnosis(&report.text) {
                Ok(diagnosis) => {
                    session.set_pending_fix(diagnosis.clone());
                    Some(diagnosis)
                }
                Err(err) => {
                    // An existing pending fix stays as it was.
                    tracing::info!(session = %session.id, "diagnosis has no usable fix: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let mut summary = format!(
            "I ran `{}` on `{}` (earliest={}, latest={}) and found {} record(s).",
            intent,
            args.application_name,
            window.earliest,
            window.latest,
            results.len()
        );
        if let Some(fix) = &pending_fix {
            summary.push_str(&format!(
                " Suggested fix for `{}` at line {} is pending.",
                fix.file_path, fix.line_number
            ));
        }
        session.conversation.push_assistant(summary);

        Ok(Response::IntentResult(IntentOutcome {
            intent,
            application: args.application_name,
            window,
            query,
            results,
            diagnosis: report.text,
            pending_fix,
        }))
    }
}

/// A full reference, or a bare repository name owned by `user`.
fn default_repo_ref(raw: &str, user: Option<&str>) -> Option<RepoRef> {
    RepoRef::parse(raw).or_else(|| {
        let name = raw.trim().trim_end_matches(".git");
        if name.contains('/') || name.contains(':') {
            return None;
        }
        RepoRef::parse(&format!("{}/{}", user?.trim(), name))
    })
}

/// A short reply that only confirms the pending fix, such as "yes" or
/// "apply the fix". Anything longer is a fresh query.
fn is_apply_confirmation(text: &str) -> bool {
    Regex::new(
        r"(?i)^\s*(yes|ok|apply(\s+(it|the\s+fix))?|(open|create|raise)\s+(a|the)\s+(pr|pull\s+request))\W*$",
    )
    .map(|re| re.is_match(text))
    .unwrap_or(false)
}
