//! Binary entry point: parses argv, dispatches to the engine, and is the
//! only place allowed to print a top-level error and choose a process exit
//! code (§7 "every non-fatal per-project failure is printed once at the end
//! of the run ... fatal errors abort with a single-line cause").

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use fleetsync::cli::{Cli, Command};
use fleetsync::config::{self, WorkspaceConfig};
use fleetsync::error::RepoExitError;
use fleetsync::git::RunOptions;
use fleetsync::manifest::{self, Manifest, WorkspaceLayout};
use fleetsync::project::{LocalSyncOptions, NetworkSyncOptions, Project};
use fleetsync::ssh::SshMultiplexer;
use fleetsync::sync::{self, SyncOptions};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    install_sigint_handler();

    let cli = Cli::parse();
    let top = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let start = std::time::Instant::now();
    let result = run(&cli.command, &top);
    log::debug!("run took {}", humantime::format_duration(start.elapsed()));

    SshMultiplexer::global().close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code().clamp(0, 255) as u8)
        }
    }
}

/// SIGINT aborts dispatch by terminating every live SSH master/subprocess
/// and exiting `128 + SIGINT`, per §5 Cancellation/timeout. Installed once,
/// at startup, rather than checked cooperatively inside the worker pools.
#[cfg(unix)]
fn install_sigint_handler() {
    let mut signals = match signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT]) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("could not install SIGINT handler: {e}");
            return;
        }
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            SshMultiplexer::global().close();
            std::process::exit(128 + signal_hook::consts::SIGINT);
        }
    });
}

#[cfg(not(unix))]
fn install_sigint_handler() {}

fn run(command: &Command, top: &Path) -> Result<(), RepoExitError> {
    match command {
        Command::Init {
            manifest_url,
            branch,
            manifest_name,
            groups,
            mirror,
            ..
        } => cmd_init(top, manifest_url, branch.as_deref(), manifest_name.as_deref(), groups, *mirror),

        Command::Sync {
            jobs,
            jobs_network,
            jobs_checkout,
            current_branch_only,
            detach,
            local_only,
            network_only,
            fail_fast,
            force_sync,
            force_remove_dirty,
            optimized_fetch,
            prune,
            no_tags,
            retry_fetches,
            ..
        } => cmd_sync(
            top,
            SyncOptions {
                jobs: jobs.unwrap_or(1),
                jobs_network: *jobs_network,
                jobs_checkout: *jobs_checkout,
                network: NetworkSyncOptions {
                    current_branch_only: *current_branch_only,
                    force_sync: *force_sync,
                    tags: !no_tags,
                    prune: *prune,
                    optimized_fetch: *optimized_fetch,
                    retry_fetches: *retry_fetches,
                },
                local: LocalSyncOptions {
                    force_remove_dirty: *force_remove_dirty,
                },
                detach: *detach,
                fail_fast: *fail_fast,
                network_only: *network_only,
                local_only: *local_only,
            },
        ),

        Command::Start { branch, all, projects } => {
            cmd_for_each_project(top, *all, projects, |project| project.start_branch(branch, &project.resolve_revision_id()?))
        }

        Command::Abandon { all, branch, projects } => cmd_for_each_project(top, *all, projects, |project| {
            project.abandon_branch(branch).map(|_| ())
        }),

        Command::Checkout { branch, projects } => {
            cmd_for_each_project(top, projects.is_empty(), projects, |project| project.checkout_branch(branch))
        }

        Command::Rebase { projects, .. } => cmd_for_each_project(top, projects.is_empty(), projects, |project| {
            let revision_id = project.resolve_revision_id()?;
            project.checkout_branch(&revision_id)
        }),

        Command::Download { .. } => Err(RepoExitError::Download("the code-review backend is out of scope".to_string())),

        Command::Grep { pattern, revisions, projects } => cmd_grep(top, pattern, revisions, projects),

        Command::Version => {
            println!("fleetsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn cmd_init(
    top: &Path,
    manifest_url: &str,
    branch: Option<&str>,
    manifest_name: Option<&str>,
    groups: &[String],
    mirror: bool,
) -> Result<(), RepoExitError> {
    let path = WorkspaceConfig::path_for(top);
    config::update::<WorkspaceConfig, _>(&path, |cfg| {
        cfg.manifest_url = Some(manifest_url.to_string());
        cfg.manifest_branch = branch.map(str::to_string);
        cfg.manifest_name = manifest_name.map(str::to_string);
        cfg.groups = groups.to_vec();
        cfg.mirror = mirror;
    })
    .map_err(|e| RepoExitError::UpdateManifest(e.to_string()))
}

fn load_active_manifest(top: &Path) -> Result<Manifest, RepoExitError> {
    let manifest_path = top.join(".repo").join("manifest.xml");
    Ok(manifest::load_manifest_file(&manifest_path)?)
}

fn cmd_sync(top: &Path, options: SyncOptions) -> Result<(), RepoExitError> {
    let manifest = load_active_manifest(top)?;
    let layout = WorkspaceLayout::new(top.to_path_buf());
    sync::sync_workspace(&manifest, &layout, &options)
}

/// Run `op` over every project selected by `projects` (or every manifest
/// project when `all` is set, or `projects` is empty for subcommands that
/// default to "the whole workspace"), aggregating per-project failures the
/// same way the Sync Engine does.
fn cmd_for_each_project(
    top: &Path,
    all: bool,
    projects: &[String],
    op: impl Fn(&Project) -> Result<(), fleetsync::error::GitError>,
) -> Result<(), RepoExitError> {
    let manifest = load_active_manifest(top)?;
    let layout = WorkspaceLayout::new(top.to_path_buf());

    let selected: Vec<&fleetsync::manifest::ManifestProject> = if all || projects.is_empty() {
        manifest.projects.iter().collect()
    } else {
        let mut found = Vec::new();
        for name in projects {
            let Some(p) = manifest.project_by_name(name) else {
                return Err(RepoExitError::NoSuchProject(name.clone()));
            };
            found.push(p);
        }
        found
    };

    let mut failures = Vec::new();
    for manifest_project in selected {
        let project = Project::from_manifest(&manifest, manifest_project, &layout);
        if let Err(e) = op(&project) {
            failures.push((project.name.clone(), e.to_string()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RepoExitError::aggregate(failures))
    }
}

fn cmd_grep(top: &Path, pattern: &str, revisions: &[String], projects: &[String]) -> Result<(), RepoExitError> {
    let manifest = load_active_manifest(top)?;
    let layout = WorkspaceLayout::new(top.to_path_buf());

    let selected: Vec<&fleetsync::manifest::ManifestProject> = if projects.is_empty() {
        manifest.projects.iter().collect()
    } else {
        let mut found = Vec::new();
        for name in projects {
            let Some(p) = manifest.project_by_name(name) else {
                return Err(RepoExitError::NoSuchProject(name.clone()));
            };
            found.push(p);
        }
        found
    };

    for manifest_project in selected {
        let project = Project::from_manifest(&manifest, manifest_project, &layout);
        let run_opts = RunOptions {
            gitdir: Some(project.gitdir.clone()),
            worktree: project.worktree.clone(),
            objdir: Some(project.objdir.clone()),
            ..Default::default()
        };
        let mut args = vec!["grep", "--line-number", pattern];
        for rev in revisions {
            args.push(rev.as_str());
        }
        if let Ok(out) = fleetsync::git::run(&args, &run_opts, None)
            && out.ok()
        {
            let text = out.stdout_utf8();
            for line in text.lines() {
                println!("{}: {line}", project.name);
            }
        }
    }
    Ok(())
}
