//! Manifest Model (C11): an arena+index model for the subset of manifest XML
//! elements needed to drive and test the sync engine (§6 Manifest XML).
//!
//! `<include>`, `<extend-project>`, `<remove-project>`, and `<submanifest>`
//! are parsed into the model so fixtures can declare them, but resolved with
//! a single direct pass — no recursive include graph, no multi-manifest
//! merge. The engine needs a faithful-enough in-memory manifest to drive
//! C3-C6, not a general-purpose manifest compiler.

mod xml;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ManifestError;
use crate::path::validate_manifest_path;

pub use xml::load_manifest_file;

/// Index into [`Manifest::remotes`]. Cyclic Manifest/Project/Remote
/// references are resolved by arena+index rather than shared ownership.
pub type RemoteIndex = usize;

#[derive(Debug, Clone, Default)]
pub struct Default_ {
    pub remote: Option<String>,
    pub revision: Option<String>,
    pub dest_branch: Option<String>,
    pub upstream: Option<String>,
    pub sync_j: Option<u32>,
    pub sync_c: bool,
    pub sync_s: bool,
    pub sync_tags: bool,
}

#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub fetch: String,
    pub pushurl: Option<String>,
    pub alias: Option<String>,
    pub review: Option<String>,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFile {
    pub src: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFile {
    pub src: String,
    pub dest: String,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub name: String,
    pub value: String,
    pub keep: bool,
}

#[derive(Debug, Clone)]
pub struct ManifestProject {
    pub name: String,
    pub path: String,
    pub remote: Option<RemoteIndex>,
    pub revision: Option<String>,
    pub groups: Vec<String>,
    pub sync_c: bool,
    pub sync_s: bool,
    pub sync_tags: bool,
    pub clone_depth: Option<u32>,
    pub dest_branch: Option<String>,
    pub upstream: Option<String>,
    pub rebase: bool,
    pub copyfiles: Vec<CopyFile>,
    pub linkfiles: Vec<LinkFile>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct ExtendProject {
    pub name: String,
    pub path: Option<String>,
    pub dest_path: Option<String>,
    pub groups: Option<Vec<String>>,
    pub revision: Option<String>,
    pub remote: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoveProject {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Include {
    pub name: String,
    pub groups: Vec<String>,
}

/// In-memory manifest model: parallel arenas of remotes/projects plus the
/// directives applied over them in a single post-pass.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub remotes: Vec<Remote>,
    pub default: Default_,
    pub projects: Vec<ManifestProject>,
    pub extend_projects: Vec<ExtendProject>,
    pub remove_projects: Vec<RemoveProject>,
    pub includes: Vec<Include>,
    pub notice: Option<String>,
    pub manifest_server_url: Option<String>,
}

impl Manifest {
    pub fn remote_by_name(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    pub fn project_by_name(&self, name: &str) -> Option<&ManifestProject> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Validate every `<copyfile>`/`<linkfile>` path in the manifest (§4.3
    /// Path safety), without touching the filesystem.
    pub fn validate_paths(&self) -> Result<(), ManifestError> {
        for project in &self.projects {
            for copyfile in &project.copyfiles {
                validate_manifest_path(&copyfile.src, false).map_err(|source| ManifestError::InvalidPath {
                    project: project.name.clone(),
                    source,
                })?;
                validate_manifest_path(&copyfile.dest, true).map_err(|source| ManifestError::InvalidPath {
                    project: project.name.clone(),
                    source,
                })?;
            }
            for linkfile in &project.linkfiles {
                validate_manifest_path(&linkfile.dest, true).map_err(|source| ManifestError::InvalidPath {
                    project: project.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Apply `<extend-project>`/`<remove-project>` as a single post-pass over
    /// the freshly parsed project list, per §6's "single direct pass" rule.
    pub fn apply_directives(&mut self) -> Result<(), ManifestError> {
        for remove in &self.remove_projects {
            let before = self.projects.len();
            self.projects.retain(|p| p.name != remove.name);
            if !remove.optional && self.projects.len() == before {
                return Err(ManifestError::Parse(format!(
                    "remove-project '{}' does not match any project",
                    remove.name
                )));
            }
        }

        for extend in &self.extend_projects {
            let remote_index = extend
                .remote
                .as_ref()
                .and_then(|name| self.remotes.iter().position(|r| r.name == *name));
            let Some(project) = self.projects.iter_mut().find(|p| p.name == extend.name) else {
                return Err(ManifestError::Parse(format!(
                    "extend-project '{}' does not match any project",
                    extend.name
                )));
            };
            if let Some(path) = &extend.dest_path {
                project.path = path.clone();
            } else if let Some(path) = &extend.path {
                project.path = path.clone();
            }
            if let Some(groups) = &extend.groups {
                project.groups.extend(groups.iter().cloned());
            }
            if let Some(revision) = &extend.revision {
                project.revision = Some(revision.clone());
            }
            if remote_index.is_some() {
                project.remote = remote_index;
            }
        }

        Ok(())
    }

    /// The effective revision expression for a project: its own `revision`,
    /// falling back to its remote's, falling back to the manifest default.
    pub fn revision_expr(&self, project: &ManifestProject) -> Option<String> {
        project
            .revision
            .clone()
            .or_else(|| project.remote.and_then(|i| self.remotes.get(i)).and_then(|r| r.revision.clone()))
            .or_else(|| self.default.revision.clone())
    }
}

/// A project's physical layout choice, probed from disk rather than
/// declared globally (§9 Open Questions: git-worktrees vs. classic layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectLayout {
    /// A full checkout: `gitdir` is `<path>/.git`, a real directory.
    Classic,
    /// A linked worktree: `<path>/.git` is a file pointing at a shared gitdir.
    GitWorktree,
}

impl ProjectLayout {
    /// Probe `dot_git` (the `<path>/.git` entry) to determine which layout a
    /// project is using on disk.
    pub fn probe(dot_git: &std::path::Path) -> std::io::Result<Self> {
        if dot_git.is_file() {
            let contents = std::fs::read_to_string(dot_git)?;
            if contents.trim_start().starts_with("gitdir:") {
                return Ok(ProjectLayout::GitWorktree);
            }
        }
        Ok(ProjectLayout::Classic)
    }
}

/// Paths derived from the `<top>/.repo` layout (§6 On-disk layout).
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub top: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(top: PathBuf) -> Self {
        Self { top }
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.top.join(".repo")
    }

    pub fn project_gitdir(&self, path: &str) -> PathBuf {
        self.repo_dir().join("projects").join(format!("{path}.git"))
    }

    pub fn project_objdir(&self, name: &str) -> PathBuf {
        self.repo_dir().join("project-objects").join(format!("{name}.git"))
    }

    pub fn worktree(&self, path: &str) -> PathBuf {
        self.top.join(path)
    }

    pub fn project_list_path(&self) -> PathBuf {
        self.repo_dir().join("project.list")
    }

    pub fn fetch_times_path(&self) -> PathBuf {
        self.repo_dir().join(".repo_fetchtimes.json")
    }
}

/// Objdir -> names of projects that reference it, used to decide when
/// `extensions.preciousObjects` must be set (§8 invariant 5).
pub fn group_by_objdir<'a>(manifest: &'a Manifest) -> HashMap<String, Vec<&'a ManifestProject>> {
    let mut groups: HashMap<String, Vec<&ManifestProject>> = HashMap::new();
    for project in &manifest.projects {
        groups.entry(project.name.clone()).or_default().push(project);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project(name: &str) -> ManifestProject {
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
    fn remove_project_drops_matching_project() {
        let mut manifest = Manifest {
            projects: vec![sample_project("foo"), sample_project("bar")],
            remove_projects: vec![RemoveProject { name: "foo".to_string(), optional: false }],
            ..Default::default()
        };
        manifest.apply_directives().unwrap();
        assert!(manifest.project_by_name("foo").is_none());
        assert!(manifest.project_by_name("bar").is_some());
    }

    #[test]
    fn extend_project_merges_groups_and_revision() {
        let mut manifest = Manifest {
            projects: vec![sample_project("foo")],
            extend_projects: vec![ExtendProject {
                name: "foo".to_string(),
                path: None,
                dest_path: None,
                groups: Some(vec!["extra".to_string()]),
                revision: Some("refs/heads/topic".to_string()),
                remote: None,
            }],
            ..Default::default()
        };
        manifest.apply_directives().unwrap();
        let project = manifest.project_by_name("foo").unwrap();
        assert_eq!(project.groups, vec!["extra".to_string()]);
        assert_eq!(project.revision.as_deref(), Some("refs/heads/topic"));
    }

    #[test]
    fn invalid_copyfile_path_is_rejected() {
        let mut project = sample_project("foo");
        project.copyfiles.push(CopyFile { src: "../escape".to_string(), dest: "ok".to_string() });
        let manifest = Manifest { projects: vec![project], ..Default::default() };
        assert!(manifest.validate_paths().is_err());
    }

    #[test]
    fn shared_objdir_groups_same_named_projects() {
        let manifest = Manifest {
            projects: vec![
                ManifestProject { path: "a/libx".to_string(), ..sample_project("libx") },
                ManifestProject { path: "b/libx".to_string(), ..sample_project("libx") },
            ],
            ..Default::default()
        };
        let groups = group_by_objdir(&manifest);
        assert_eq!(groups.get("libx").map(|v| v.len()), Some(2));
    }
}
