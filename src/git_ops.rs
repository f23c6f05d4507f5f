//! Working copy for the remediation pipeline.
//!
//! Local operations (branch, checkout, stage, commit) go through git2.
//! Network operations (clone, pull, push) shell out to `git` so the user's
//! credential helpers and SSH config apply.

use crate::github::RepoRef;
use crate::remediation::SourceControl;
use crate::util::{resolve_in_root, run_command_with_timeout};
use anyhow::{Context, Result};
use git2::{BranchType, Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const GIT_NETWORK_TIMEOUT_SECS: u64 = 180;

/// Maximum length for git ref names
const MAX_GIT_REF_LENGTH: usize = 255;

pub fn is_valid_branch_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_GIT_REF_LENGTH {
        return false;
    }

    // Reject refs starting with hyphen (could be interpreted as git flags)
    if name.starts_with('-') {
        return false;
    }

    if name.starts_with('.') || name.ends_with('.') || name.ends_with('/') {
        return false;
    }

    if name.ends_with(".lock") {
        return false;
    }

    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return false;
    }

    !name.chars().any(|c| {
        c.is_control()
            || matches!(
                c,
                ' ' | '~'
                    | '^'
                    | ':'
                    | '?'
                    | '*'
                    | '['
                    | '\\'
                    | '\''
                    | '"'
                    | '`'
                    | '$'
                    | '!'
                    | '&'
                    | ';'
                    | '|'
                    | '<'
                    | '>'
            )
    })
}

fn push_disabled_by_env() -> bool {
    std::env::var("LOGMEDIC_DISABLE_PUSH")
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Run `git` with `args` in `dir`, failing on a non-zero exit or timeout.
fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0");

    let output = run_command_with_timeout(&mut cmd, Duration::from_secs(GIT_NETWORK_TIMEOUT_SECS))
        .map_err(|e| anyhow::anyhow!("Failed to run git {}: {}", args.join(" "), e))?;

    if output.timed_out {
        return Err(anyhow::anyhow!(
            "git {} timed out after {}s",
            args.join(" "),
            GIT_NETWORK_TIMEOUT_SECS
        ));
    }
    if !output.success() {
        return Err(anyhow::anyhow!(
            "git {} failed: {}",
            args.join(" "),
            output.stderr.trim()
        ));
    }
    Ok(output.stdout)
}

/// Single-slot working copy at a fixed path.
pub struct GitWorkspace {
    root: PathBuf,
    clone_base: String,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>, clone_base: &str) -> Self {
        Self {
            root: root.into(),
            clone_base: clone_base.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.root).with_context(|| {
            format!("Failed to open working copy at '{}'", self.root.display())
        })
    }

    fn is_cloned(&self) -> bool {
        self.root.join(".git").exists()
    }

    fn clone_fresh(&self, url: &str) -> Result<()> {
        let parent = self
            .root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        let target = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                anyhow::anyhow!("'{}' cannot hold a working copy", self.root.display())
            })?;
        run_git(parent, &["clone", url, target.as_str()])?;
        Ok(())
    }

    /// The slot holds one repository; refuse to reuse it for another.
    fn check_origin(&self, repo: &Repository, expected: &RepoRef, url: &str) -> Result<()> {
        let remote = repo.find_remote("origin").context("Working copy has no origin")?;
        let origin = remote.url().unwrap_or_default();
        let matches = origin == url || RepoRef::parse(origin).as_ref() == Some(expected);
        if !matches {
            return Err(anyhow::anyhow!(
                "working copy at '{}' is a clone of {}, not {}",
                self.root.display(),
                origin,
                expected
            ));
        }
        Ok(())
    }

    fn checkout_branch(&self, repo: &Repository, name: &str, force: bool) -> Result<()> {
        let (object, reference) = repo
            .revparse_ext(name)
            .with_context(|| format!("Branch '{}' not found", name))?;

        let mut opts = git2::build::CheckoutBuilder::new();
        if force {
            opts.force();
        } else {
            opts.safe();
        }
        repo.checkout_tree(&object, Some(&mut opts))?;

        match reference {
            Some(r) => repo.set_head(r.name().unwrap_or("HEAD"))?,
            None => repo.set_head_detached(object.id())?,
        }
        Ok(())
    }

    /// Check out `base`, creating it from `origin/base` when only the remote
    /// branch exists.
    fn checkout_base(&self, repo: &Repository, base: &str, force: bool) -> Result<()> {
        if repo.find_branch(base, BranchType::Local).is_err() {
            let remote = repo
                .find_branch(&format!("origin/{}", base), BranchType::Remote)
                .with_context(|| format!("Base branch '{}' not found", base))?;
            let commit = remote.get().peel_to_commit()?;
            let mut local = repo.branch(base, &commit, false)?;
            local.set_upstream(Some(&format!("origin/{}", base)))?;
        }
        self.checkout_branch(repo, base, force)
    }

    fn current_branch(repo: &Repository) -> Option<String> {
        repo.head()
            .ok()
            .filter(|h| h.is_branch())
            .and_then(|h| h.shorthand().map(str::to_string))
    }
}

impl SourceControl for GitWorkspace {
    fn sync(&self, repo_ref: &RepoRef, base_branch: &str) -> Result<()> {
        let url = repo_ref.clone_url(&self.clone_base);
        if !self.is_cloned() {
            tracing::info!(path = %self.root.display(), "cloning {}", repo_ref);
            self.clone_fresh(&url)?;
            let repo = self.open()?;
            if Self::current_branch(&repo).as_deref() != Some(base_branch) {
                self.checkout_base(&repo, base_branch, false)?;
            }
            return Ok(());
        }

        let repo = self.open()?;
        self.check_origin(&repo, repo_ref, &url)?;
        tracing::info!(path = %self.root.display(), "updating working copy");
        self.checkout_base(&repo, base_branch, false)?;
        run_git(&self.root, &["pull", "--ff-only", "origin", base_branch])?;
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.open()?;
        Ok(repo.find_branch(branch, BranchType::Local).is_ok()
            || repo
                .find_branch(&format!("origin/{}", branch), BranchType::Remote)
                .is_ok())
    }

    fn create_branch(&self, branch: &str) -> Result<()> {
        let repo = self.open()?;
        let head = repo
            .head()
            .context("Failed to read HEAD")?
            .peel_to_commit()
            .context("Failed to resolve HEAD commit")?;
        repo.branch(branch, &head, false)
            .with_context(|| format!("Failed to create branch '{}'", branch))?;

        if let Err(error) = self.checkout_branch(&repo, branch, false) {
            // Leave no half-created branch behind.
            let cleanup_failed = repo
                .find_branch(branch, BranchType::Local)
                .and_then(|mut b| b.delete())
                .is_err();
            if cleanup_failed {
                return Err(anyhow::anyhow!(
                    "Failed to checkout newly created branch '{}' ({}). Cleanup also failed; you may need to delete the branch manually.",
                    branch,
                    error
                ));
            }
            return Err(anyhow::anyhow!(
                "Failed to checkout newly created branch '{}': {}",
                branch,
                error
            ));
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = resolve_in_root(&self.root, path).map_err(|e| anyhow::anyhow!(e))?;
        if !full.is_file() {
            return Ok(None);
        }
        fs::read_to_string(&full)
            .map(Some)
            .with_context(|| format!("Failed to read '{}'", path))
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let full = resolve_in_root(&self.root, path).map_err(|e| anyhow::anyhow!(e))?;
        fs::write(&full, contents).with_context(|| format!("Failed to write '{}'", path))
    }

    fn commit_file(&self, path: &str, message: &str) -> Result<String> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        index.add_path(Path::new(path.trim()))?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let parent = repo
            .head()
            .context("Failed to read HEAD")?
            .peel_to_commit()
            .context("Failed to resolve HEAD commit")?;

        let config = repo.config()?;
        let name = config
            .get_string("user.name")
            .unwrap_or_else(|_| "logmedic".to_string());
        let email = config
            .get_string("user.email")
            .unwrap_or_else(|_| "logmedic@local".to_string());
        let sig = Signature::now(&name, &email)?;

        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(oid.to_string())
    }

    fn push_branch(&self, branch: &str) -> Result<()> {
        if push_disabled_by_env() {
            return Err(anyhow::anyhow!(
                "Push blocked: sandbox mode is active (LOGMEDIC_DISABLE_PUSH=1)."
            ));
        }
        run_git(&self.root, &["push", "--set-upstream", "origin", branch])?;
        Ok(())
    }

    fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        if push_disabled_by_env() {
            return Err(anyhow::anyhow!(
                "Push blocked: sandbox mode is active (LOGMEDIC_DISABLE_PUSH=1)."
            ));
        }
        run_git(&self.root, &["push", "origin", "--delete", branch])?;
        Ok(())
    }

    fn discard_branch(&self, branch: &str, base_branch: &str) -> Result<()> {
        let repo = self.open()?;
        self.checkout_base(&repo, base_branch, true)?;
        // Created by the failed attempt, so the upstream-tracking check the
        // interactive delete would do does not apply.
        let mut local = repo
            .find_branch(branch, BranchType::Local)
            .with_context(|| format!("Local branch '{}' not found", branch))?;
        local
            .delete()
            .with_context(|| format!("Failed to delete local branch '{}'", branch))?;
        Ok(())
    }
}
