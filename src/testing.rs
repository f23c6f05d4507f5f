//! Test doubles for the external collaborators: a scripted model, a counting
//! search backend, an in-memory working copy and a recording PR host.

use crate::github::RepoRef;
use crate::llm::{ChatModel, ChatReply, ChatRequest};
use crate::remediation::{PullRequestHost, PullRequestSpec, SourceControl};
use crate::search::{DispatchState, ResultSet, SearchBackend, SessionToken};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Model
// ============================================================================

/// Replies in order; `Err` entries become call failures. Every request is
/// recorded.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ChatReply, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ChatReply, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }
}

// ============================================================================
// Search backend
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BackendCalls {
    pub submits: usize,
    pub polls: usize,
    pub fetches: usize,
    pub log: Vec<String>,
}

enum PollScript {
    /// Report RUNNING this many times, then DONE.
    RunningFor(usize),
    States(VecDeque<Result<DispatchState, String>>),
}

pub struct StubBackend {
    login_ok: bool,
    job_id: Option<String>,
    script: Mutex<PollScript>,
    records: Vec<serde_json::Value>,
    calls: Mutex<BackendCalls>,
    queries: Mutex<Vec<String>>,
}

impl StubBackend {
    fn build(login_ok: bool, job_id: Option<&str>, script: PollScript) -> Self {
        Self {
            login_ok,
            job_id: job_id.map(str::to_string),
            script: Mutex::new(script),
            records: vec![serde_json::json!({
                "_raw": "2024-05-01 ERROR PaymentService NullPointerException at PaymentService.java:42"
            })],
            calls: Mutex::new(BackendCalls::default()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// `usize::MAX` means the job never finishes.
    pub fn running_for(n: usize) -> Self {
        Self::build(true, Some("job-1"), PollScript::RunningFor(n))
    }

    pub fn login_fails() -> Self {
        Self::build(false, Some("job-1"), PollScript::RunningFor(0))
    }

    pub fn no_job_id() -> Self {
        Self::build(true, None, PollScript::RunningFor(0))
    }

    /// Poll answers in order; DONE once they run out.
    pub fn with_states(states: Vec<Result<DispatchState, String>>) -> Self {
        Self::build(true, Some("job-1"), PollScript::States(states.into()))
    }

    pub fn with_records(mut self, records: Vec<serde_json::Value>) -> Self {
        self.records = records;
        self
    }

    pub fn calls(&self) -> BackendCalls {
        self.calls.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn record(&self, entry: &str) {
        self.calls.lock().unwrap().log.push(entry.to_string());
    }
}

#[async_trait]
impl SearchBackend for StubBackend {
    async fn login(&self) -> anyhow::Result<SessionToken> {
        self.record("login");
        if self.login_ok {
            Ok(SessionToken::new("stub-session"))
        } else {
            Err(anyhow::anyhow!("login returned 401"))
        }
    }

    async fn submit(&self, _token: &SessionToken, query: &str) -> anyhow::Result<Option<String>> {
        self.record("submit");
        self.calls.lock().unwrap().submits += 1;
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.job_id.clone())
    }

    async fn poll(&self, _token: &SessionToken, _job_id: &str) -> anyhow::Result<DispatchState> {
        let polls = {
            let mut calls = self.calls.lock().unwrap();
            calls.polls += 1;
            let n = calls.polls;
            calls.log.push(format!("poll {}", n));
            n
        };
        let mut script = self.script.lock().unwrap();
        match &mut *script {
            PollScript::RunningFor(n) => {
                if polls <= *n {
                    Ok(DispatchState::Running)
                } else {
                    Ok(DispatchState::Done)
                }
            }
            PollScript::States(states) => match states.pop_front() {
                Some(Ok(state)) => Ok(state),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(DispatchState::Done),
            },
        }
    }

    async fn fetch(&self, _token: &SessionToken, _job_id: &str) -> anyhow::Result<ResultSet> {
        self.record("fetch");
        self.calls.lock().unwrap().fetches += 1;
        Ok(ResultSet::new(self.records.clone()))
    }
}

// ============================================================================
// Working copy
// ============================================================================

#[derive(Default)]
struct FakeRepoState {
    files: HashMap<String, String>,
    local_branches: BTreeSet<String>,
    remote_branches: BTreeSet<String>,
    fail_on: Option<String>,
    log: Vec<String>,
    branches_created: Vec<String>,
    commits: Vec<String>,
    pushed: Vec<String>,
    discarded: Vec<String>,
    remote_deleted: Vec<String>,
}

/// In-memory [`SourceControl`]. Clones share state, so a test can keep a
/// handle after boxing one into a `Remediator`.
#[derive(Clone, Default)]
pub struct FakeSourceControl {
    state: Arc<Mutex<FakeRepoState>>,
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    /// Make one step fail: sync, branch, read, write, commit, push,
    /// delete_remote or discard.
    pub fn failing_on(self, step: &str) -> Self {
        self.state.lock().unwrap().fail_on = Some(step.to_string());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn branches_created(&self) -> Vec<String> {
        self.state.lock().unwrap().branches_created.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn discarded(&self) -> Vec<String> {
        self.state.lock().unwrap().discarded.clone()
    }

    pub fn remote_deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().remote_deleted.clone()
    }

    fn step(&self, name: &str) -> anyhow::Result<std::sync::MutexGuard<'_, FakeRepoState>> {
        let mut state = self.state.lock().unwrap();
        state.log.push(name.to_string());
        if state.fail_on.as_deref() == Some(name) {
            return Err(anyhow::anyhow!("simulated {} failure", name));
        }
        Ok(state)
    }
}

impl SourceControl for FakeSourceControl {
    fn sync(&self, _repo: &RepoRef, _base_branch: &str) -> anyhow::Result<()> {
        self.step("sync").map(|_| ())
    }

    fn branch_exists(&self, branch: &str) -> anyhow::Result<bool> {
        let state = self.step("branch_exists")?;
        Ok(state.local_branches.contains(branch) || state.remote_branches.contains(branch))
    }

    fn create_branch(&self, branch: &str) -> anyhow::Result<()> {
        let mut state = self.step("branch")?;
        state.local_branches.insert(branch.to_string());
        state.branches_created.push(branch.to_string());
        Ok(())
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
        let state = self.step("read")?;
        Ok(state.files.get(path).cloned())
    }

    fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()> {
        let mut state = self.step("write")?;
        state.files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    fn commit_file(&self, _path: &str, message: &str) -> anyhow::Result<String> {
        let mut state = self.step("commit")?;
        state.commits.push(message.to_string());
        Ok(format!("{:040x}", state.commits.len()))
    }

    fn push_branch(&self, branch: &str) -> anyhow::Result<()> {
        let mut state = self.step("push")?;
        state.remote_branches.insert(branch.to_string());
        state.pushed.push(branch.to_string());
        Ok(())
    }

    fn delete_remote_branch(&self, branch: &str) -> anyhow::Result<()> {
        let mut state = self.step("delete_remote")?;
        state.remote_branches.remove(branch);
        state.remote_deleted.push(branch.to_string());
        Ok(())
    }

    fn discard_branch(&self, branch: &str, _base_branch: &str) -> anyhow::Result<()> {
        let mut state = self.step("discard")?;
        state.local_branches.remove(branch);
        state.discarded.push(branch.to_string());
        Ok(())
    }
}

// ============================================================================
// Pull-request host
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeHost {
    opened: Arc<Mutex<Vec<PullRequestSpec>>>,
    failure: Option<String>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<PullRequestSpec> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestHost for FakeHost {
    async fn open_pull_request(&self, spec: &PullRequestSpec) -> anyhow::Result<String> {
        if let Some(message) = &self.failure {
            return Err(anyhow::anyhow!("GitHub API error: {}", message));
        }
        let mut opened = self.opened.lock().unwrap();
        opened.push(spec.clone());
        Ok(format!(
            "https://github.com/{}/{}/pull/{}",
            spec.repo.owner,
            spec.repo.name,
            opened.len()
        ))
    }
}
