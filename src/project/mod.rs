//! Project (C3): the per-repository state machine — init, fetch (network
//! half), checkout/fast-forward/rebase/reset (local half), branch lifecycle,
//! and copy/link materialization.

mod copylink;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GitError, RepoError};
use crate::git::{self, RunOptions};
use crate::manifest::{Manifest, ManifestProject, WorkspaceLayout};
use crate::refcache::RefCache;
use crate::ssh::SshMultiplexer;
use crate::sync::buffer::SyncBuffer;

/// Options governing [`Project::sync_network_half`] (§4.3).
#[derive(Debug, Clone)]
pub struct NetworkSyncOptions {
    pub current_branch_only: bool,
    pub force_sync: bool,
    pub tags: bool,
    pub prune: bool,
    pub optimized_fetch: bool,
    pub retry_fetches: u32,
}

impl Default for NetworkSyncOptions {
    fn default() -> Self {
        Self {
            current_branch_only: false,
            force_sync: false,
            tags: true,
            prune: false,
            optimized_fetch: false,
            retry_fetches: 0,
        }
    }
}

/// Options governing [`Project::sync_local_half`] (§4.3).
#[derive(Debug, Clone, Default)]
pub struct LocalSyncOptions {
    pub force_remove_dirty: bool,
}

/// Owned, thread-sendable snapshot of one manifest project bound to its
/// on-disk paths, built once before the sync engine's worker pools dispatch.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub relpath: String,
    pub revision_expr: String,
    pub dest_branch: Option<String>,
    pub upstream: Option<String>,
    pub rebase: bool,
    pub sync_tags: bool,
    pub gitdir: PathBuf,
    pub objdir: PathBuf,
    pub worktree: Option<PathBuf>,
    pub fetch_url: String,
    pub remote_name: String,
}

impl Project {
    pub fn from_manifest(manifest: &Manifest, project: &ManifestProject, layout: &WorkspaceLayout) -> Self {
        let remote = project.remote.and_then(|i| manifest.remotes.get(i));
        let fetch_url = remote.map(|r| r.fetch.clone()).unwrap_or_default();
        let remote_name = remote.map(|r| r.name.clone()).unwrap_or_else(|| "origin".to_string());
        Project {
            name: project.name.clone(),
            relpath: project.path.clone(),
            revision_expr: manifest.revision_expr(project).unwrap_or_else(|| "refs/heads/main".to_string()),
            dest_branch: project.dest_branch.clone(),
            upstream: project.upstream.clone(),
            rebase: project.rebase,
            sync_tags: project.sync_tags,
            gitdir: layout.project_gitdir(&project.path),
            objdir: layout.project_objdir(&project.name),
            worktree: Some(layout.worktree(&project.path)),
            fetch_url,
            remote_name,
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            gitdir: Some(self.gitdir.clone()),
            worktree: self.worktree.clone(),
            objdir: Some(self.objdir.clone()),
            bare: self.worktree.is_none(),
            disable_editor: true,
            ..Default::default()
        }
    }

    /// Network half: bring `objdir` up to date with the remote. Returns
    /// `(ok, fetched_objdir)`.
    pub fn sync_network_half(&self, options: &NetworkSyncOptions, ssh: &SshMultiplexer) -> Result<(bool, PathBuf), GitError> {
        if !self.gitdir.exists() {
            self.init_gitdir()?;
        }
        self.configure_remote()?;

        if options.optimized_fetch && self.revision_already_present()? {
            return Ok((true, self.objdir.clone()));
        }

        let mut args: Vec<String> = vec!["fetch".to_string(), self.remote_name.clone()];
        if options.prune {
            args.push("--prune".to_string());
        }
        if options.tags {
            args.push("--tags".to_string());
        } else {
            args.push("--no-tags".to_string());
        }
        args.push(self.fetch_refspec(options.current_branch_only));

        let attempts = options.retry_fetches + 2;
        let run_opts = self.run_options();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let mut last_err = None;
        for attempt in 0..attempts {
            match git::run_checked(&arg_refs, &run_opts, Some(ssh)) {
                Ok(_) => {
                    git::run(&["pack-refs", "--all", "--prune"], &run_opts, None).ok();
                    return Ok((true, self.objdir.clone()));
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        std::thread::sleep(Duration::from_secs(30 + jitter_seconds()));
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GitError::Io("fetch failed with no attempts made".to_string())))
    }

    fn fetch_refspec(&self, current_branch_only: bool) -> String {
        if current_branch_only {
            format!("+{}:refs/remotes/{}/{}", self.revision_expr, self.remote_name, self.remote_tracking_name())
        } else {
            format!("+refs/heads/*:refs/remotes/{}/*", self.remote_name)
        }
    }

    /// The name `revision_expr` maps to under `refs/remotes/<remote>/`: a
    /// branch's short name, or the expression itself for a sha/tag.
    fn remote_tracking_name(&self) -> &str {
        self.revision_expr.strip_prefix("refs/heads/").unwrap_or(&self.revision_expr)
    }

    fn init_gitdir(&self) -> Result<(), GitError> {
        std::fs::create_dir_all(&self.gitdir)?;
        let run_opts = RunOptions {
            gitdir: Some(self.gitdir.clone()),
            bare: true,
            ..Default::default()
        };
        git::run_checked(&["init", "--bare"], &run_opts, None)?;
        // `--bare` lays out refs/objects/HEAD directly under `gitdir` (the
        // layout this driver wants for a `<name>.git` storage directory) but
        // also sets `core.bare=true`, which makes git refuse any working-tree
        // operation. Every project gitdir here is paired with a worktree via
        // `GIT_WORK_TREE`, so that default must be overridden.
        git::run(&["config", "core.bare", "false"], &run_opts, None)?;
        Ok(())
    }

    fn configure_remote(&self) -> Result<(), GitError> {
        let run_opts = self.run_options();
        let key = format!("remote.{}.url", self.remote_name);
        git::run(&["config", &key, &self.fetch_url], &run_opts, None)?;
        Ok(())
    }

    fn revision_already_present(&self) -> Result<bool, GitError> {
        let out = git::run(&["rev-parse", "--verify", "-q", &format!("{}^{{commit}}", self.revision_expr)], &self.run_options(), None)?;
        Ok(out.ok())
    }

    /// Resolve `revisionExpr` to a concrete sha, falling back to
    /// `rev-parse --verify rev^0` per §4.3.
    pub fn resolve_revision_id(&self) -> Result<String, GitError> {
        let direct = git::run(&["rev-parse", "--verify", "-q", &format!("refs/remotes/{}/{}", self.remote_name, self.remote_tracking_name())], &self.run_options(), None)?;
        if direct.ok() {
            return Ok(direct.stdout_utf8().trim().to_string());
        }
        let fallback = git::run_checked(&["rev-parse", "--verify", &format!("{}^0", self.revision_expr)], &self.run_options(), None)?;
        Ok(fallback.stdout_utf8().trim().to_string())
    }

    /// Reads through the Ref Cache (C2) rather than shelling out directly, so
    /// a sync that inspects the same gitdir's `HEAD` more than once in one
    /// pass pays for `for-each-ref` only once.
    fn head_sha(&self) -> Result<String, GitError> {
        let sha = RefCache::new(&self.gitdir).get("HEAD")?;
        if sha.is_empty() {
            return Err(GitError::Io(format!("no HEAD in {}", self.gitdir.display())));
        }
        Ok(sha)
    }

    fn current_branch(&self) -> Result<Option<String>, GitError> {
        let target = RefCache::new(&self.gitdir).symref("HEAD")?;
        Ok(target.strip_prefix("refs/heads/").map(str::to_string))
    }

    fn rebase_in_progress(&self) -> bool {
        let gitdir_for_state = self.worktree.as_deref().map(|w| w.join(".git")).unwrap_or_else(|| self.gitdir.clone());
        gitdir_for_state.join("rebase-merge").exists() || gitdir_for_state.join("rebase-apply").exists()
    }

    fn is_dirty(&self) -> Result<bool, GitError> {
        let out = git::run_checked(&["status", "--porcelain"], &self.run_options(), None)?;
        Ok(!out.stdout_utf8().trim().is_empty())
    }

    fn has_upstream_tracking(&self, branch: &str) -> bool {
        git::run(&["rev-parse", "--abbrev-ref", &format!("{branch}@{{upstream}}")], &self.run_options(), None)
            .map(|o| o.ok())
            .unwrap_or(false)
    }

    fn is_merged_into(&self, commit: &str, target: &str) -> bool {
        git::run(&["merge-base", "--is-ancestor", commit, target], &self.run_options(), None)
            .map(|o| o.ok())
            .unwrap_or(false)
    }

    fn commits_behind(&self, branch_tip: &str, upstream_tip: &str) -> usize {
        git::run(&["rev-list", "--count", &format!("{branch_tip}..{upstream_tip}")], &self.run_options(), None)
            .ok()
            .and_then(|o| o.stdout_utf8().trim().parse().ok())
            .unwrap_or(0)
    }

    fn commits_ahead(&self, upstream_tip: &str, branch_tip: &str) -> usize {
        git::run(&["rev-list", "--count", &format!("{upstream_tip}..{branch_tip}")], &self.run_options(), None)
            .ok()
            .and_then(|o| o.stdout_utf8().trim().parse().ok())
            .unwrap_or(0)
    }

    fn all_ahead_commits_are_mine(&self, upstream_tip: &str, branch_tip: &str) -> bool {
        let me = git::run(&["config", "user.email"], &self.run_options(), None)
            .ok()
            .map(|o| o.stdout_utf8().trim().to_string())
            .unwrap_or_default();
        if me.is_empty() {
            return false;
        }
        git::run(&["log", "--format=%ae", &format!("{upstream_tip}..{branch_tip}")], &self.run_options(), None)
            .map(|o| o.stdout_utf8().lines().all(|line| line.trim() == me))
            .unwrap_or(false)
    }

    /// Local half: the exact precedence order in SPEC_FULL.md §4.3 MUST be
    /// preserved — reordering changes which failure a given worktree state
    /// reports.
    pub fn sync_local_half(&self, buf: &mut SyncBuffer, manifest_project: &ManifestProject, options: &LocalSyncOptions) -> Result<(), RepoError> {
        if let Some(worktree) = &self.worktree {
            std::fs::create_dir_all(worktree).map_err(GitError::from).map_err(RepoError::Git)?;
        }

        let revision_id = self.resolve_revision_id().map_err(RepoError::Git)?;

        // A gitdir with no HEAD yet is a project that has never been checked
        // out (the first sync after `init_gitdir`); none of the precedence
        // rules below apply to a worktree that doesn't exist yet.
        if self.head_sha().is_err() {
            self.checkout(&revision_id).map_err(RepoError::Git)?;
            self.materialize_files(manifest_project).map_err(RepoError::Git)?;
            return Ok(());
        }

        let head = self.head_sha().map_err(RepoError::Git)?;
        let branch = self.current_branch().map_err(RepoError::Git)?;

        let detached = branch.is_none();

        if detached && self.rebase_in_progress() {
            return Err(RepoError::PriorSyncFailed);
        }
        if detached && head == revision_id {
            return Ok(());
        }
        if detached {
            self.checkout(&revision_id).map_err(RepoError::Git)?;
            self.materialize_files(manifest_project).map_err(RepoError::Git)?;
            return Ok(());
        }

        let branch = branch.expect("checked detached above");
        if !self.has_upstream_tracking(&branch) {
            log::warn!("project {} branch {branch} has no upstream tracking; detaching", self.name);
            self.checkout(&revision_id).map_err(RepoError::Git)?;
            self.materialize_files(manifest_project).map_err(RepoError::Git)?;
            return Ok(());
        }
        if head == revision_id {
            return Ok(());
        }

        let ahead = self.commits_ahead(&revision_id, &head);
        let behind = self.commits_behind(&head, &revision_id);

        if ahead == 0 {
            if behind == 0 {
                return Ok(());
            }
            // Head is an ancestor of revision_id: a clean fast-forward, safe
            // regardless of worktree cleanliness. Enqueued rather than run
            // synchronously so every project's fast-forward lands before any
            // project's rebase (§4.7's two-gate sequence).
            let gitdir = self.gitdir.clone();
            let worktree = self.worktree.clone();
            let objdir = self.objdir.clone();
            let revision_id_owned = revision_id.clone();
            buf.later1(self.name.clone(), move || {
                let run_opts = RunOptions { gitdir: Some(gitdir), worktree, objdir: Some(objdir), disable_editor: true, ..Default::default() };
                git::run_checked(&["merge", "--ff-only", &revision_id_owned], &run_opts, None).map(|_| ())
            });
            self.materialize_files(manifest_project).map_err(RepoError::Git)?;
            return Ok(());
        }

        // Local commits exist ahead of upstream; the dirty-worktree check
        // gates the two branches below, per §4.3.
        if self.is_dirty().map_err(RepoError::Git)? && !options.force_remove_dirty {
            return Err(RepoError::Dirty);
        }

        if behind == 0 {
            // Nothing new upstream; our commits are the only difference.
            return Ok(());
        }

        // Diverged: commits on both sides.
        if self.rebase && self.all_ahead_commits_are_mine(&revision_id, &head) {
            let gitdir = self.gitdir.clone();
            let worktree = self.worktree.clone();
            let objdir = self.objdir.clone();
            let revision_id_owned = revision_id.clone();
            buf.later2(self.name.clone(), move || {
                let run_opts = RunOptions { gitdir: Some(gitdir), worktree, objdir: Some(objdir), disable_editor: true, ..Default::default() };
                git::run_checked(&["rebase", "--onto", &revision_id_owned, "HEAD~1"], &run_opts, None).map(|_| ())
            });
            self.materialize_files(manifest_project).map_err(RepoError::Git)?;
            return Ok(());
        }

        Err(RepoError::PublishedButBehind { branch, commits_behind: behind })
    }

    fn checkout(&self, revision_id: &str) -> Result<(), GitError> {
        git::run_checked(&["checkout", revision_id], &self.run_options(), None).map(|_| ())
    }

    fn reset_hard(&self, revision_id: &str) -> Result<(), GitError> {
        git::run_checked(&["reset", "--hard", revision_id], &self.run_options(), None).map(|_| ())
    }

    fn materialize_files(&self, manifest_project: &ManifestProject) -> Result<(), GitError> {
        let Some(worktree) = &self.worktree else { return Ok(()) };
        let workspace_top = worktree.ancestors().nth(manifest_project.path.matches('/').count() + 1).unwrap_or(worktree);
        for copyfile in &manifest_project.copyfiles {
            copylink::materialize_copyfile(worktree, workspace_top, copyfile)?;
        }
        for linkfile in &manifest_project.linkfiles {
            copylink::materialize_linkfile(worktree, workspace_top, linkfile)?;
        }
        Ok(())
    }

    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.checkout(name)
    }

    pub fn start_branch(&self, name: &str, revision_id: &str) -> Result<(), GitError> {
        git::run_checked(&["checkout", "-b", name, revision_id], &self.run_options(), None).map(|_| ())
    }

    /// Returns `Ok(true)` if deleted, `Ok(false)` if the branch existed but
    /// could not be deleted, matching the tri-state contract in §4.3.
    pub fn abandon_branch(&self, name: &str) -> Result<Option<bool>, GitError> {
        let exists = git::run(&["rev-parse", "--verify", "-q", &format!("refs/heads/{name}")], &self.run_options(), None)?.ok();
        if !exists {
            return Ok(None);
        }
        let out = git::run(&["branch", "-D", name], &self.run_options(), None)?;
        Ok(Some(out.ok()))
    }

    pub fn prune_heads(&self) -> Result<Vec<String>, GitError> {
        let out = git::run_checked(&["for-each-ref", "--format=%(refname:short)", "refs/heads"], &self.run_options(), None)?;
        let mut pruned = Vec::new();
        for branch in out.stdout_utf8().lines() {
            let merged = self.is_merged_into(&format!("refs/heads/{branch}"), &format!("refs/remotes/{}/{branch}", self.remote_name));
            if merged && git::run(&["branch", "-d", branch], &self.run_options(), None).map(|o| o.ok()).unwrap_or(false) {
                pruned.push(branch.to_string());
            }
        }
        Ok(pruned)
    }
}

fn jitter_seconds() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..=15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest_project() -> ManifestProject {
        ManifestProject {
            name: "foo".to_string(),
            path: "foo".to_string(),
            remote: None,
            revision: None,
            groups: vec![],
            sync_c: false,
            sync_s: false,
            sync_tags: false,
            clone_depth: None,
            dest_branch: None,
            upstream: None,
            rebase: true,
            copyfiles: vec![],
            linkfiles: vec![],
            annotations: vec![],
        }
    }

    #[test]
    fn fetch_refspec_full_sync_covers_all_heads() {
        let manifest_project = sample_manifest_project();
        let manifest = Manifest { projects: vec![manifest_project], ..Default::default() };
        let layout = WorkspaceLayout::new(PathBuf::from("/tmp/workspace"));
        let project = Project::from_manifest(&manifest, manifest.project_by_name("foo").unwrap(), &layout);
        assert_eq!(project.fetch_refspec(false), "+refs/heads/*:refs/remotes/origin/*");
    }

    #[test]
    fn fetch_refspec_current_branch_only_targets_single_ref() {
        let manifest_project = sample_manifest_project();
        let manifest = Manifest { projects: vec![manifest_project], ..Default::default() };
        let layout = WorkspaceLayout::new(PathBuf::from("/tmp/workspace"));
        let mut project = Project::from_manifest(&manifest, manifest.project_by_name("foo").unwrap(), &layout);
        project.revision_expr = "refs/heads/main".to_string();
        assert_eq!(project.fetch_refspec(true), "+refs/heads/main:refs/remotes/origin/main");
    }
}
