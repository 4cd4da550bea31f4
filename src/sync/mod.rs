//! Sync Engine (C6): wires the Manifest Model, Project state machine,
//! SSH Multiplexer, Fetch-Time Oracle, and Parallel Executor into one
//! end-to-end sync operation (§4.6).
//!
//! The fetch and checkout phases are each one flat [`crate::executor`] call
//! grouped by objdir — never nested pools — so a fetch worker can never end
//! up waiting on a checkout worker that is itself waiting for a pool slot.

pub mod buffer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{GitError, RepoError, RepoExitError};
use crate::eventlog::EventLog;
use crate::executor::{clamp_jobs_to_fd_limit, execute_in_parallel};
use crate::manifest::{Manifest, WorkspaceLayout, group_by_objdir};
use crate::oracle::FetchTimeOracle;
use crate::project::{LocalSyncOptions, NetworkSyncOptions, Project};
use crate::ssh::SshMultiplexer;
use crate::sync::buffer::SyncBuffer;

/// Options for a full workspace sync, gathered from CLI flags (§6).
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Default worker count for both pools, used when the per-pool override
    /// below is left unset (§4.6 `jobs`/`jobsNetwork`/`jobsCheckout`).
    pub jobs: usize,
    pub jobs_network: Option<usize>,
    pub jobs_checkout: Option<usize>,
    pub network: NetworkSyncOptions,
    pub local: LocalSyncOptions,
    pub detach: bool,
    /// Stop dispatching new fetch/checkout groups once any task in that
    /// phase has failed; in-flight tasks still finish (§4.6 step 4).
    pub fail_fast: bool,
    pub network_only: bool,
    pub local_only: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            jobs_network: None,
            jobs_checkout: None,
            network: NetworkSyncOptions::default(),
            local: LocalSyncOptions::default(),
            detach: false,
            fail_fast: false,
            network_only: false,
            local_only: false,
        }
    }
}

/// Outcome of one project's fetch, reduced back to the data the checkout
/// phase and the oracle need.
struct FetchOutcome {
    name: String,
    ok: bool,
    elapsed_secs: f64,
    error: Option<String>,
}

/// Outcome of one project's checkout, reduced to what the final report needs.
struct CheckoutOutcome {
    name: String,
    error: Option<RepoError>,
}

/// Run a full network+local sync over every project in `manifest`, at the
/// workspace rooted at `layout`. Returns `Ok(())` if every project ended
/// clean, or a [`RepoExitError::Sync`] aggregating every per-project failure.
pub fn sync_workspace(manifest: &Manifest, layout: &WorkspaceLayout, options: &SyncOptions) -> Result<(), RepoExitError> {
    let network_jobs = clamp_jobs_to_fd_limit(options.jobs_network.unwrap_or(options.jobs).max(1));
    let checkout_jobs = clamp_jobs_to_fd_limit(options.jobs_checkout.unwrap_or(options.jobs).max(1));
    let ssh = SshMultiplexer::global();
    let event_log = EventLog::open(&layout.repo_dir().join("TRACE_FILE"), "fleetsync");
    event_log.start(&std::env::args().collect::<Vec<_>>());

    let projects: Vec<Project> = manifest
        .projects
        .iter()
        .map(|p| Project::from_manifest(manifest, p, layout))
        .collect();

    let mut oracle = FetchTimeOracle::load(&layout.fetch_times_path());
    let mut ordered_names: Vec<String> = projects.iter().map(|p| p.name.clone()).collect();
    oracle.order_longest_first(&mut ordered_names);
    let order: HashMap<&str, usize> = ordered_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let mut projects = projects;
    projects.sort_by_key(|p| order.get(p.name.as_str()).copied().unwrap_or(usize::MAX));

    let mut failures: Vec<(String, String)> = Vec::new();
    let mut fetched_ok: std::collections::HashSet<String> = projects.iter().map(|p| p.name.clone()).collect();

    if !options.local_only {
        let fetch_results = fetch_all(&projects, &options.network, ssh, network_jobs, options.fail_fast, &event_log);

        fetched_ok = fetch_results.iter().filter(|o| o.ok).map(|o| o.name.clone()).collect();
        for outcome in &fetch_results {
            if outcome.ok {
                oracle.set(&outcome.name, outcome.elapsed_secs);
            }
        }
        if let Err(e) = oracle.save() {
            log::warn!("failed to persist fetch-time oracle: {e}");
        }

        failures.extend(fetch_results.iter().filter_map(|o| o.error.as_ref().map(|e| (o.name.clone(), e.clone()))));
    }

    reconcile_project_list(manifest, layout, &options.local);

    if !options.network_only {
        let checkout_targets: Vec<&Project> = projects.iter().filter(|p| fetched_ok.contains(&p.name)).collect();
        let checkout_results = checkout_all(&checkout_targets, manifest, &options.local, checkout_jobs, options.fail_fast, &event_log);
        for outcome in checkout_results {
            if let Some(err) = outcome.error {
                failures.push((outcome.name, err.to_string()));
            }
        }
    }

    garbage_collect(manifest, &projects);

    if !failures.is_empty() {
        event_log.error(&format!("sync failed for {} project(s)", failures.len()));
    }
    event_log.exit(if failures.is_empty() { 0 } else { 1 });

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RepoExitError::aggregate(failures))
    }
}

/// Partition `projects` into fetch groups keyed by objdir, preserving the
/// oracle-assigned order within and across groups. Projects sharing an
/// objdir race on the same object store, so they are fetched strictly in
/// order within their group; different groups run concurrently (§4.6 step 3
/// — "the key scheduling insight — the worker unit is a group, not a
/// project").
fn partition_into_fetch_groups(projects: &[Project]) -> Vec<Vec<Project>> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut groups: HashMap<PathBuf, Vec<Project>> = HashMap::new();
    for project in projects {
        if !groups.contains_key(&project.objdir) {
            order.push(project.objdir.clone());
        }
        groups.entry(project.objdir.clone()).or_default().push(project.clone());
    }
    order.into_iter().map(|objdir| groups.remove(&objdir).unwrap_or_default()).collect()
}

fn fetch_all(
    projects: &[Project],
    options: &NetworkSyncOptions,
    ssh: &SshMultiplexer,
    jobs: usize,
    fail_fast: bool,
    event_log: &EventLog,
) -> Vec<FetchOutcome> {
    let groups = partition_into_fetch_groups(projects);
    let stop = AtomicBool::new(false);

    let per_group = execute_in_parallel(
        jobs,
        groups,
        |group| {
            let mut outcomes = Vec::with_capacity(group.len());
            for project in group {
                if fail_fast && stop.load(Ordering::Relaxed) {
                    outcomes.push(FetchOutcome {
                        name: project.name.clone(),
                        ok: false,
                        elapsed_secs: 0.0,
                        error: Some("skipped: an earlier fetch failed and --fail-fast is set".to_string()),
                    });
                    continue;
                }

                let t_start = std::time::Instant::now();
                let outcome = match project.sync_network_half(options, ssh) {
                    Ok((ok, _objdir)) => FetchOutcome {
                        name: project.name.clone(),
                        ok,
                        elapsed_secs: t_start.elapsed().as_secs_f64(),
                        error: None,
                    },
                    Err(e) => FetchOutcome {
                        name: project.name.clone(),
                        ok: false,
                        elapsed_secs: t_start.elapsed().as_secs_f64(),
                        error: Some(e.to_string()),
                    },
                };
                event_log.project_task(&outcome.name, "fetch", 0.0, outcome.elapsed_secs, outcome.ok);
                if fail_fast && !outcome.ok {
                    stop.store(true, Ordering::Relaxed);
                }
                outcomes.push(outcome);
            }
            outcomes
        },
        |iter| iter.collect::<Vec<Vec<FetchOutcome>>>(),
    );

    per_group.into_iter().flatten().collect()
}

fn checkout_all(
    projects: &[&Project],
    manifest: &Manifest,
    options: &LocalSyncOptions,
    jobs: usize,
    fail_fast: bool,
    event_log: &EventLog,
) -> Vec<CheckoutOutcome> {
    let owned: Vec<Project> = projects.iter().map(|p| (*p).clone()).collect();
    let stop = AtomicBool::new(false);

    execute_in_parallel(
        jobs,
        owned,
        |project| {
            if fail_fast && stop.load(Ordering::Relaxed) {
                return CheckoutOutcome {
                    name: project.name.clone(),
                    error: Some(RepoError::Git(GitError::Io(
                        "skipped: an earlier checkout failed and --fail-fast is set".to_string(),
                    ))),
                };
            }

            let Some(manifest_project) = manifest.project_by_name(&project.name) else {
                return CheckoutOutcome {
                    name: project.name.clone(),
                    error: None,
                };
            };
            let t_start = std::time::Instant::now();
            let mut buf = SyncBuffer::new();
            let result = project.sync_local_half(&mut buf, manifest_project, options);
            let (clean, _messages, buf_failures) = buf.finish();
            let error = result.err().or_else(|| {
                if clean {
                    None
                } else {
                    buf_failures
                        .first()
                        .map(|(_, msg)| RepoError::Git(GitError::Io(msg.clone())))
                }
            });
            event_log.project_task(&project.name, "checkout", 0.0, t_start.elapsed().as_secs_f64(), error.is_none());
            if fail_fast && error.is_some() {
                stop.store(true, Ordering::Relaxed);
            }
            CheckoutOutcome {
                name: project.name.clone(),
                error,
            }
        },
        |iter| iter.collect(),
    )
}

/// Reconcile `.repo/project.list` against the current manifest (§4.6 step 7):
/// remove the worktree and gitdir of every path that dropped out of the
/// manifest, refusing a dirty worktree unless `local.force_remove_dirty` is
/// set, then write the new list.
fn reconcile_project_list(manifest: &Manifest, layout: &WorkspaceLayout, local: &crate::project::LocalSyncOptions) {
    let path = layout.project_list_path();
    let previous: Vec<String> = std::fs::read_to_string(&path)
        .map(|contents| contents.lines().map(str::to_string).collect())
        .unwrap_or_default();

    let current: Vec<String> = manifest.projects.iter().map(|p| p.path.clone()).collect();
    for stale in previous.iter().filter(|p| !current.contains(p)) {
        remove_stale_project(layout, stale, local.force_remove_dirty);
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&path, current.join("\n"));
}

/// Delete a worktree and its gitdir that no longer appear in the manifest,
/// leaving both in place if the worktree carries uncommitted changes and
/// `force` is not set (§8 invariant 3, preservation of unmerged work).
fn remove_stale_project(layout: &WorkspaceLayout, relpath: &str, force: bool) {
    let worktree = layout.worktree(relpath);
    let gitdir = layout.project_gitdir(relpath);

    if worktree.exists() && !force {
        let run_opts = crate::git::RunOptions {
            gitdir: Some(gitdir.clone()),
            worktree: Some(worktree.clone()),
            ..Default::default()
        };
        let dirty = crate::git::run(&["status", "--porcelain"], &run_opts, None)
            .map(|o| !o.stdout_utf8().trim().is_empty())
            .unwrap_or(true);
        if dirty {
            log::warn!(
                "project '{relpath}' is no longer in the manifest but its worktree has uncommitted changes; leaving it in place (use --force-remove-dirty to remove)"
            );
            return;
        }
    }

    let _ = std::fs::remove_dir_all(&worktree);
    let _ = std::fs::remove_dir_all(&gitdir);
}

/// Set `extensions.preciousObjects` on every project gitdir that shares its
/// objdir with another project, then run `git gc --auto` through each
/// project's own gitdir (which is where `extensions.preciousObjects` is
/// actually consulted from — the shared objdir itself holds no config of
/// its own) so gc in one project never prunes objects still reachable only
/// from a sibling (§8 invariant 5).
fn garbage_collect(manifest: &Manifest, projects: &[Project]) {
    let groups = group_by_objdir(manifest);
    for project in projects {
        if !project.gitdir.exists() {
            continue;
        }
        let run_opts = crate::git::RunOptions {
            gitdir: Some(project.gitdir.clone()),
            objdir: Some(project.objdir.clone()),
            bare: true,
            ..Default::default()
        };
        let shared = groups.get(&project.name).map(|members| members.len() > 1).unwrap_or(false);
        if shared {
            let _ = crate::git::run(&["config", "extensions.preciousObjects", "true"], &run_opts, None);
        }
        let _ = crate::git::run(&["gc", "--auto"], &run_opts, None);
    }
}

/// Paths that belong to a project that exists in `manifest` but whose
/// worktree is missing on disk, so the engine can reclone before checkout.
pub fn missing_worktrees(manifest: &Manifest, layout: &WorkspaceLayout) -> Vec<PathBuf> {
    manifest
        .projects
        .iter()
        .map(|p| layout.worktree(&p.path))
        .filter(|path| !path.exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestProject;

    fn sample_manifest_project(name: &str) -> ManifestProject {
        ManifestProject {
            name: name.to_string(),
            path: name.to_string(),
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
    fn missing_worktrees_lists_projects_absent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().to_path_buf());
        let manifest = Manifest {
            projects: vec![sample_manifest_project("foo"), sample_manifest_project("bar")],
            ..Default::default()
        };
        std::fs::create_dir_all(layout.worktree("foo")).unwrap();

        let missing = missing_worktrees(&manifest, &layout);
        assert_eq!(missing, vec![layout.worktree("bar")]);
    }

    #[test]
    fn reconcile_project_list_writes_current_manifest_paths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().to_path_buf());
        let manifest = Manifest {
            projects: vec![sample_manifest_project("foo")],
            ..Default::default()
        };
        reconcile_project_list(&manifest, &layout, &LocalSyncOptions::default());
        let contents = std::fs::read_to_string(layout.project_list_path()).unwrap();
        assert_eq!(contents, "foo");
    }

    #[test]
    fn reconcile_project_list_removes_stale_worktree_and_gitdir_when_forced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().to_path_buf());
        std::fs::create_dir_all(layout.worktree("old")).unwrap();
        std::fs::create_dir_all(layout.project_gitdir("old")).unwrap();
        std::fs::create_dir_all(layout.repo_dir()).unwrap();
        std::fs::write(layout.project_list_path(), "old").unwrap();

        let manifest = Manifest::default();
        reconcile_project_list(&manifest, &layout, &LocalSyncOptions { force_remove_dirty: true });

        assert!(!layout.worktree("old").exists());
        assert!(!layout.project_gitdir("old").exists());
    }

    #[test]
    fn fetch_groups_share_an_objdir_serially() {
        let layout = WorkspaceLayout::new(PathBuf::from("/tmp/workspace"));
        let manifest = Manifest {
            projects: vec![
                ManifestProject { path: "a/libx".to_string(), ..sample_manifest_project("libx") },
                sample_manifest_project("solo"),
                ManifestProject { path: "b/libx".to_string(), ..sample_manifest_project("libx") },
            ],
            ..Default::default()
        };
        let projects: Vec<Project> = manifest.projects.iter().map(|p| Project::from_manifest(&manifest, p, &layout)).collect();

        let groups = partition_into_fetch_groups(&projects);

        assert_eq!(groups.len(), 2, "libx's two projects must collapse into one group");
        let libx_group = groups.iter().find(|g| g.len() == 2).expect("shared-objdir group");
        assert_eq!(libx_group[0].objdir, libx_group[1].objdir);
    }
}
