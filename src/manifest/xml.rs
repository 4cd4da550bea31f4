//! `quick-xml` serde deserialization of the manifest element subset listed
//! in §6 "Manifest XML", converted into the [`super::Manifest`] arena model.

use std::path::Path;

use serde::Deserialize;

use super::{Annotation, CopyFile, Default_, ExtendProject, Include, LinkFile, Manifest, ManifestProject, Remote, RemoveProject};
use crate::error::ManifestError;

#[derive(Debug, Deserialize)]
#[serde(rename = "manifest")]
struct RawManifest {
    #[serde(rename = "remote", default)]
    remotes: Vec<RawRemote>,
    #[serde(rename = "default", default)]
    default: Option<RawDefault>,
    #[serde(rename = "project", default)]
    projects: Vec<RawProject>,
    #[serde(rename = "extend-project", default)]
    extend_projects: Vec<RawExtendProject>,
    #[serde(rename = "remove-project", default)]
    remove_projects: Vec<RawRemoveProject>,
    #[serde(rename = "include", default)]
    includes: Vec<RawInclude>,
    notice: Option<String>,
    #[serde(rename = "manifest-server")]
    manifest_server: Option<RawManifestServer>,
}

#[derive(Debug, Deserialize)]
struct RawManifestServer {
    #[serde(rename = "@url")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawRemote {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@fetch")]
    fetch: String,
    #[serde(rename = "@pushurl")]
    pushurl: Option<String>,
    #[serde(rename = "@alias")]
    alias: Option<String>,
    #[serde(rename = "@review")]
    review: Option<String>,
    #[serde(rename = "@revision")]
    revision: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDefault {
    #[serde(rename = "@remote")]
    remote: Option<String>,
    #[serde(rename = "@revision")]
    revision: Option<String>,
    #[serde(rename = "@dest-branch")]
    dest_branch: Option<String>,
    #[serde(rename = "@upstream")]
    upstream: Option<String>,
    #[serde(rename = "@sync-j")]
    sync_j: Option<u32>,
    #[serde(rename = "@sync-c", default)]
    sync_c: bool,
    #[serde(rename = "@sync-s", default)]
    sync_s: bool,
    #[serde(rename = "@sync-tags", default)]
    sync_tags: bool,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@path")]
    path: Option<String>,
    #[serde(rename = "@remote")]
    remote: Option<String>,
    #[serde(rename = "@revision")]
    revision: Option<String>,
    #[serde(rename = "@groups")]
    groups: Option<String>,
    #[serde(rename = "@sync-c", default)]
    sync_c: bool,
    #[serde(rename = "@sync-s", default)]
    sync_s: bool,
    #[serde(rename = "@sync-tags", default)]
    sync_tags: bool,
    #[serde(rename = "@clone-depth")]
    clone_depth: Option<u32>,
    #[serde(rename = "@dest-branch")]
    dest_branch: Option<String>,
    #[serde(rename = "@upstream")]
    upstream: Option<String>,
    #[serde(rename = "@rebase", default = "default_true")]
    rebase: bool,
    #[serde(rename = "copyfile", default)]
    copyfiles: Vec<RawCopyFile>,
    #[serde(rename = "linkfile", default)]
    linkfiles: Vec<RawLinkFile>,
    #[serde(rename = "annotation", default)]
    annotations: Vec<RawAnnotation>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawCopyFile {
    #[serde(rename = "@src")]
    src: String,
    #[serde(rename = "@dest")]
    dest: String,
}

#[derive(Debug, Deserialize)]
struct RawLinkFile {
    #[serde(rename = "@src")]
    src: String,
    #[serde(rename = "@dest")]
    dest: String,
}

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@value")]
    value: String,
    #[serde(rename = "@keep", default = "default_true")]
    keep: bool,
}

#[derive(Debug, Deserialize)]
struct RawExtendProject {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@path")]
    path: Option<String>,
    #[serde(rename = "@dest-path")]
    dest_path: Option<String>,
    #[serde(rename = "@groups")]
    groups: Option<String>,
    #[serde(rename = "@revision")]
    revision: Option<String>,
    #[serde(rename = "@remote")]
    remote: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRemoveProject {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@optional", default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
struct RawInclude {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@groups")]
    groups: Option<String>,
}

fn split_groups(groups: &Option<String>) -> Vec<String> {
    groups
        .as_deref()
        .map(|g| g.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Parse a manifest XML document into the engine's in-memory model,
/// resolving remote indices and applying `<extend-project>`/`<remove-project>`
/// as a single post-pass.
pub fn load_manifest_str(xml: &str) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = quick_xml::de::from_str(xml).map_err(|e| ManifestError::Parse(e.to_string()))?;

    let remotes: Vec<Remote> = raw
        .remotes
        .into_iter()
        .map(|r| Remote {
            name: r.name,
            fetch: r.fetch,
            pushurl: r.pushurl,
            alias: r.alias,
            review: r.review,
            revision: r.revision,
        })
        .collect();

    let remote_index = |name: &Option<String>| name.as_ref().and_then(|n| remotes.iter().position(|r| &r.name == n));

    let projects = raw
        .projects
        .into_iter()
        .map(|p| {
            let path = p.path.clone().unwrap_or_else(|| p.name.clone());
            ManifestProject {
                remote: remote_index(&p.remote),
                name: p.name,
                path,
                revision: p.revision,
                groups: split_groups(&p.groups),
                sync_c: p.sync_c,
                sync_s: p.sync_s,
                sync_tags: p.sync_tags,
                clone_depth: p.clone_depth,
                dest_branch: p.dest_branch,
                upstream: p.upstream,
                rebase: p.rebase,
                copyfiles: p.copyfiles.into_iter().map(|c| CopyFile { src: c.src, dest: c.dest }).collect(),
                linkfiles: p.linkfiles.into_iter().map(|l| LinkFile { src: l.src, dest: l.dest }).collect(),
                annotations: p
                    .annotations
                    .into_iter()
                    .map(|a| Annotation { name: a.name, value: a.value, keep: a.keep })
                    .collect(),
            }
        })
        .collect();

    let mut manifest = Manifest {
        remotes,
        default: raw.default.map(|d| Default_ {
            remote: d.remote,
            revision: d.revision,
            dest_branch: d.dest_branch,
            upstream: d.upstream,
            sync_j: d.sync_j,
            sync_c: d.sync_c,
            sync_s: d.sync_s,
            sync_tags: d.sync_tags,
        }).unwrap_or_default(),
        projects,
        extend_projects: raw
            .extend_projects
            .into_iter()
            .map(|e| ExtendProject {
                name: e.name,
                path: e.path,
                dest_path: e.dest_path,
                groups: e.groups.map(|g| split_groups(&Some(g))),
                revision: e.revision,
                remote: e.remote,
            })
            .collect(),
        remove_projects: raw
            .remove_projects
            .into_iter()
            .map(|r| RemoveProject { name: r.name, optional: r.optional })
            .collect(),
        includes: raw
            .includes
            .into_iter()
            .map(|i| Include { name: i.name, groups: split_groups(&i.groups) })
            .collect(),
        notice: raw.notice,
        manifest_server_url: raw.manifest_server.map(|s| s.url),
    };

    manifest.apply_directives()?;
    manifest.validate_paths()?;
    Ok(manifest)
}

/// Load and parse the manifest file at `path`, resolving exactly one level
/// of `<include>` relative to the manifest's own directory (§6: "no
/// transitive include graph").
pub fn load_manifest_file(path: &Path) -> Result<Manifest, ManifestError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ManifestError::NoManifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut manifest = load_manifest_str(&contents)?;

    let include_dir = path.parent().unwrap_or_else(|| Path::new("."));
    for include in manifest.includes.clone() {
        let include_path = include_dir.join(&include.name);
        let included_xml = std::fs::read_to_string(&include_path).map_err(|e| ManifestError::NoManifest {
            path: include_path.clone(),
            reason: e.to_string(),
        })?;
        let included = load_manifest_str(&included_xml)?;
        manifest.remotes.extend(included.remotes);
        manifest.projects.extend(included.projects);
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::manifest::{CopyFile, LinkFile};

    const SAMPLE: &str = r#"
        <manifest>
          <remote name="origin" fetch="https://example.com/"/>
          <default remote="origin" revision="refs/heads/main"/>
          <project name="foo" path="src/foo" revision="refs/heads/topic">
            <copyfile src="LICENSE" dest="LICENSE"/>
            <linkfile src="tools/hook" dest="hooks/hook"/>
          </project>
          <project name="bar"/>
        </manifest>
    "#;

    #[test]
    fn parses_remotes_defaults_and_projects() {
        let manifest = load_manifest_str(SAMPLE).unwrap();
        assert_eq!(manifest.remotes.len(), 1);
        assert_eq!(manifest.default.revision.as_deref(), Some("refs/heads/main"));
        let foo = manifest.project_by_name("foo").unwrap();
        assert_eq!(foo.path, "src/foo");
        assert_eq!(
            foo.copyfiles,
            vec![CopyFile { src: "LICENSE".to_string(), dest: "LICENSE".to_string() }]
        );
        assert_eq!(
            foo.linkfiles,
            vec![LinkFile { src: "tools/hook".to_string(), dest: "hooks/hook".to_string() }]
        );
        assert_eq!(manifest.revision_expr(foo).as_deref(), Some("refs/heads/topic"));

        let bar = manifest.project_by_name("bar").unwrap();
        assert_eq!(bar.path, "bar");
        assert_eq!(manifest.revision_expr(bar).as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn rejects_unsafe_copyfile_path() {
        let xml = r#"
            <manifest>
              <project name="foo">
                <copyfile src="../../etc/passwd" dest="stolen"/>
              </project>
            </manifest>
        "#;
        assert!(load_manifest_str(xml).is_err());
    }
}
