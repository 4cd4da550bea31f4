//! CLI (C12): the `fleetsync` argument surface (§6 CLI surface).
//!
//! Parsing is kept separate from dispatch: `main.rs` matches on [`Command`]
//! and calls into [`crate::sync`]/[`crate::manifest`]/[`crate::config`]; this
//! module only knows how to turn `argv` into typed structs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "fleetsync", version, about = "Parallel multi-repository workspace synchronization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Declare a manifest URL/branch for this workspace.
    Init {
        #[arg(long = "manifest-url")]
        manifest_url: String,
        #[arg(short = 'b', long = "branch")]
        branch: Option<String>,
        #[arg(short = 'm', long = "manifest-name")]
        manifest_name: Option<String>,
        #[arg(short = 'g', long = "groups")]
        groups: Vec<String>,
        #[arg(long)]
        mirror: bool,
        #[arg(long)]
        archive: bool,
        #[arg(long)]
        worktree: bool,
        #[arg(long = "reference")]
        reference: Option<PathBuf>,
        #[arg(long)]
        dissociate: bool,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long = "partial-clone")]
        partial_clone: bool,
        #[arg(long = "clone-filter")]
        clone_filter: Option<String>,
        #[arg(long = "clone-bundle", overrides_with = "no_clone_bundle")]
        clone_bundle: bool,
        #[arg(long = "no-clone-bundle", overrides_with = "clone_bundle")]
        no_clone_bundle: bool,
        #[arg(long = "standalone-manifest")]
        standalone_manifest: bool,
        #[arg(long)]
        submodules: bool,
        #[arg(long = "use-superproject")]
        use_superproject: bool,
    },

    /// Fetch and check out every project in the active manifest.
    Sync {
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<usize>,
        #[arg(long = "jobs-network")]
        jobs_network: Option<usize>,
        #[arg(long = "jobs-checkout")]
        jobs_checkout: Option<usize>,
        #[arg(short = 'c', long = "current-branch")]
        current_branch_only: bool,
        #[arg(short = 'd', long = "detach")]
        detach: bool,
        #[arg(short = 'l', long = "local-only")]
        local_only: bool,
        #[arg(short = 'n', long = "network-only")]
        network_only: bool,
        #[arg(long = "fail-fast")]
        fail_fast: bool,
        #[arg(long = "force-sync")]
        force_sync: bool,
        #[arg(long = "force-remove-dirty")]
        force_remove_dirty: bool,
        #[arg(long = "optimized-fetch")]
        optimized_fetch: bool,
        #[arg(long)]
        prune: bool,
        #[arg(long = "no-tags")]
        no_tags: bool,
        #[arg(short = 's', long = "smart-sync")]
        smart_sync: bool,
        #[arg(short = 't', long = "smart-tag")]
        smart_tag: Option<String>,
        #[arg(long = "retry-fetches", default_value_t = 0)]
        retry_fetches: u32,
        #[arg(long = "no-clone-bundle")]
        no_clone_bundle: bool,
        #[arg(long = "no-manifest-update")]
        no_manifest_update: bool,
        projects: Vec<String>,
    },

    /// Create `<branch>` in the named projects (or every project with `--all`).
    Start {
        branch: String,
        #[arg(long)]
        all: bool,
        projects: Vec<String>,
    },

    /// Delete `<branch>` from the named projects (or every project with `--all`).
    Abandon {
        #[arg(long)]
        all: bool,
        branch: String,
        projects: Vec<String>,
    },

    /// Check out an existing `<branch>` in the named projects.
    Checkout { branch: String, projects: Vec<String> },

    /// Rebase the current branch onto its manifest revision.
    Rebase {
        #[arg(short = 'i', long)]
        interactive: bool,
        #[arg(short = 'f', long)]
        force: bool,
        #[arg(long = "no-ff")]
        no_ff: bool,
        #[arg(long)]
        autosquash: bool,
        #[arg(long)]
        whitespace: Option<String>,
        #[arg(long = "auto-stash")]
        auto_stash: bool,
        #[arg(short = 'm')]
        onto_manifest: bool,
        projects: Vec<String>,
    },

    /// Fetch a code-review change into a local branch. The review backend is
    /// out of scope; this only parses the surface and reports a stub error.
    Download {
        #[arg(short = 'b', long = "branch")]
        branch: Option<String>,
        #[arg(short = 'c')]
        cherry_pick: bool,
        #[arg(short = 'f')]
        ff_only: bool,
        #[arg(short = 'r')]
        revert: bool,
        #[arg(short = 'x')]
        record_origin: bool,
        targets: Vec<String>,
    },

    /// Run `git grep` across the named projects (or every project).
    Grep {
        #[arg(short = 'r', long = "rev")]
        revisions: Vec<String>,
        pattern: String,
        projects: Vec<String>,
    },

    /// Print the tool version.
    Version,
}
