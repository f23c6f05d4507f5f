//! Remediation pipeline: apply the pending fix to a working copy and open a
//! pull request.
//!
//! The steps run as a saga. Each step that leaves something behind (a local
//! branch, a pushed branch) is undone if a later step fails, so a failed
//! attempt can simply be retried:
//!
//! 1. sync the working copy (clone, or checkout base + pull)
//! 2. create the fix branch (an existing branch aborts before anything else)
//! 3. refine the fix against the real file
//! 4. rewrite the target line and commit
//! 5. push the branch
//! 6. open the pull request
//!
//! The pending fix is cleared only when all six succeed.

pub mod parse;
pub mod refine;

pub use parse::{parse_diagnosis, Diagnosis, PrType};

use crate::error::{AgentError, Result};
use crate::git_ops::is_valid_branch_name;
use crate::github::RepoRef;
use crate::llm::ChatModel;
use crate::session::SessionContext;
use crate::util::resolve_in_root;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The single working-copy slot and the version-control operations on it.
pub trait SourceControl: Send + Sync {
    /// Clone `repo` if the slot is empty, otherwise check out `base_branch`
    /// and pull the latest changes.
    fn sync(&self, repo: &RepoRef, base_branch: &str) -> anyhow::Result<()>;

    /// True if the branch exists locally or on the remote.
    fn branch_exists(&self, branch: &str) -> anyhow::Result<bool>;

    /// Create `branch` at the current HEAD and check it out.
    fn create_branch(&self, branch: &str) -> anyhow::Result<()>;

    /// `None` when the file does not exist in the working copy.
    fn read_file(&self, path: &str) -> anyhow::Result<Option<String>>;

    fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()>;

    /// Stage `path` and commit it. Returns the commit id.
    fn commit_file(&self, path: &str, message: &str) -> anyhow::Result<String>;

    fn push_branch(&self, branch: &str) -> anyhow::Result<()>;

    fn delete_remote_branch(&self, branch: &str) -> anyhow::Result<()>;

    /// Force-checkout `base_branch` and delete the local `branch`.
    fn discard_branch(&self, branch: &str, base_branch: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSpec {
    pub repo: RepoRef,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Open the pull request and return its URL.
    async fn open_pull_request(&self, spec: &PullRequestSpec) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationOutcome {
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub pull_request_url: String,
    pub file_path: String,
    pub line_number: usize,
    pub refined_fix: String,
}

/// Branch for a fix: `{pr_type}/auto-fix-{file basename with '.' -> '-'}`.
/// The same diagnosis always maps to the same name.
pub fn branch_name(diagnosis: &Diagnosis) -> String {
    let trimmed = diagnosis.file_path.trim();
    let base = Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(trimmed);
    let slug: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}/auto-fix-{}", diagnosis.pr_type, slug.trim_matches('-'))
}

pub fn commit_message(diagnosis: &Diagnosis) -> String {
    format!(
        "{}: Automated fix for {} @ line {}",
        diagnosis.pr_type, diagnosis.file_path, diagnosis.line_number
    )
}

pub fn pull_request_title(diagnosis: &Diagnosis) -> String {
    format!(
        "{}: Auto Fix for {}",
        diagnosis.pr_type.title(),
        diagnosis.file_path
    )
}

pub fn pull_request_body(diagnosis: &Diagnosis, refined_fix: &str) -> String {
    let mut body = format!("Fix applied via bot:\n\n```\n{}\n```", refined_fix);
    if let Some(cause) = &diagnosis.root_cause {
        body.push_str(&format!("\n\nRoot cause: {}", cause));
    }
    body
}

#[derive(Debug, Clone)]
pub struct RemediationSettings {
    pub base_branch: String,
    pub refine_temperature: f32,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            refine_temperature: 0.2,
        }
    }
}

/// How far the saga got; decides what compensation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    NothingToUndo,
    Branched,
    Pushed,
}

pub struct Remediator {
    model: Arc<dyn ChatModel>,
    host: Arc<dyn PullRequestHost>,
    workspace: Mutex<Box<dyn SourceControl>>,
    settings: RemediationSettings,
}

impl Remediator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        source: Box<dyn SourceControl>,
        host: Arc<dyn PullRequestHost>,
        settings: RemediationSettings,
    ) -> Self {
        Self {
            model,
            host,
            workspace: Mutex::new(source),
            settings,
        }
    }

    /// Apply the session's pending fix to `repo`.
    ///
    /// Without a pending fix nothing is touched. On success the pending fix
    /// is cleared; on failure it is kept so the user can retry.
    pub async fn apply(
        &self,
        session: &mut SessionContext,
        repo: &RepoRef,
    ) -> Result<RemediationOutcome> {
        let diagnosis = session.pending_fix().cloned().ok_or_else(|| {
            AgentError::Validation(
                "There is no pending fix to apply. Ask me to diagnose an application first."
                    .to_string(),
            )
        })?;
        resolve_in_root(Path::new(""), &diagnosis.file_path).map_err(AgentError::Validation)?;
        let branch = branch_name(&diagnosis);
        if !is_valid_branch_name(&branch) {
            return Err(AgentError::Validation(format!(
                "`{}` cannot be used as a branch name",
                branch
            )));
        }

        // Held for the whole saga: one remediation per working copy at a time.
        let guard = self.workspace.lock().await;
        let source: &dyn SourceControl = &**guard;

        let mut progress = Progress::NothingToUndo;
        let result = self
            .run_steps(source, repo, &diagnosis, &branch, &mut progress)
            .await;

        match result {
            Ok(outcome) => {
                session.clear_pending_fix();
                tracing::info!(
                    branch = %outcome.branch,
                    url = %outcome.pull_request_url,
                    "remediation complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(branch = %branch, ?progress, "remediation failed: {}", err);
                self.compensate(source, &branch, progress);
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        source: &dyn SourceControl,
        repo: &RepoRef,
        diagnosis: &Diagnosis,
        branch: &str,
        progress: &mut Progress,
    ) -> Result<RemediationOutcome> {
        let base = self.settings.base_branch.as_str();
        let path = diagnosis.file_path.trim();

        tracing::info!(repo = %repo, "syncing working copy");
        source.sync(repo, base).map_err(AgentError::upstream)?;

        if source.branch_exists(branch).map_err(AgentError::upstream)? {
            return Err(AgentError::Upstream(format!(
                "branch `{}` already exists; this fix looks like it was applied before",
                branch
            )));
        }
        source.create_branch(branch).map_err(AgentError::upstream)?;
        *progress = Progress::Branched;
        tracing::info!(branch, "created fix branch");

        let original = source
            .read_file(path)
            .map_err(AgentError::upstream)?
            .ok_or_else(|| {
                AgentError::Validation(format!("`{}` does not exist in {}", path, repo))
            })?;
        let line_count = original.lines().count();
        if diagnosis.line_number > line_count {
            return Err(AgentError::Validation(format!(
                "line {} is past the end of `{}` ({} lines)",
                diagnosis.line_number, path, line_count
            )));
        }

        let refined = refine::refine_fix(
            self.model.as_ref(),
            diagnosis,
            &original,
            self.settings.refine_temperature,
        )
        .await?;
        tracing::debug!(file = path, line = diagnosis.line_number, "fix refined");

        let patched = refine::replace_line(&original, diagnosis.line_number, &refined)?;
        source
            .write_file(path, &patched)
            .map_err(AgentError::upstream)?;
        let commit = source
            .commit_file(path, &commit_message(diagnosis))
            .map_err(AgentError::upstream)?;
        tracing::info!(commit = %commit, "committed fix");

        source.push_branch(branch).map_err(AgentError::upstream)?;
        *progress = Progress::Pushed;
        tracing::info!(branch, "pushed fix branch");

        let spec = PullRequestSpec {
            repo: repo.clone(),
            title: pull_request_title(diagnosis),
            body: pull_request_body(diagnosis, &refined),
            head: branch.to_string(),
            base: base.to_string(),
        };
        let url = self
            .host
            .open_pull_request(&spec)
            .await
            .map_err(AgentError::upstream)?;

        Ok(RemediationOutcome {
            repository: repo.to_string(),
            branch: branch.to_string(),
            commit,
            pull_request_url: url,
            file_path: path.to_string(),
            line_number: diagnosis.line_number,
            refined_fix: refined,
        })
    }

    /// Undo what the failed attempt left behind. Failures here are logged,
    /// never raised over the original error.
    fn compensate(&self, source: &dyn SourceControl, branch: &str, progress: Progress) {
        if progress == Progress::Pushed {
            match source.delete_remote_branch(branch) {
                Ok(()) => tracing::info!(branch, "deleted pushed branch"),
                Err(e) => tracing::warn!(branch, "could not delete pushed branch: {:#}", e),
            }
        }
        if progress != Progress::NothingToUndo {
            match source.discard_branch(branch, &self.settings.base_branch) {
                Ok(()) => tracing::info!(branch, "discarded local branch"),
                Err(e) => tracing::warn!(branch, "could not discard local branch: {:#}", e),
            }
        }
    }
}
