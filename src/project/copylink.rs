//! Copy/link materialization (§4.3 of the Project state machine): applying a
//! project's `<copyfile>`/`<linkfile>` declarations onto the workspace top
//! after a successful checkout.

use std::path::Path;

use crate::error::GitError;
use crate::manifest::{CopyFile, LinkFile};
use crate::path::{resolve_inside, validate_manifest_path};

/// Copy `project_tree/copyfile.src` to `workspace_top/copyfile.dest`, only
/// rewriting the destination when it is missing or its content differs.
pub fn materialize_copyfile(project_tree: &Path, workspace_top: &Path, copyfile: &CopyFile) -> Result<(), GitError> {
    validate_manifest_path(&copyfile.src, false).map_err(|e| GitError::Parse(e.to_string()))?;
    validate_manifest_path(&copyfile.dest, true).map_err(|e| GitError::Parse(e.to_string()))?;

    let src = resolve_inside(project_tree, Path::new(&copyfile.src))?;
    let dest = resolve_inside(workspace_top, Path::new(&copyfile.dest))?;

    let content = std::fs::read(&src)?;
    if let Ok(existing) = std::fs::read(&dest)
        && existing == content
    {
        return Ok(());
    }

    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(&dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, &content)?;
    drop_write_bits(&dest)?;
    Ok(())
}

/// Replace `workspace_top/linkfile.dest` with a symlink pointing at
/// `linkfile.src`, relative to the project tree.
pub fn materialize_linkfile(project_tree: &Path, workspace_top: &Path, linkfile: &LinkFile) -> Result<(), GitError> {
    validate_manifest_path(&linkfile.src, false).map_err(|e| GitError::Parse(e.to_string()))?;
    validate_manifest_path(&linkfile.dest, true).map_err(|e| GitError::Parse(e.to_string()))?;

    let dest = resolve_inside(workspace_top, Path::new(&linkfile.dest))?;
    let target = resolve_inside(project_tree, Path::new(&linkfile.src))?;
    let relative_target = pathdiff::diff_paths(&target, dest.parent().unwrap_or(workspace_top)).unwrap_or(target);

    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(&dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    make_symlink(&relative_target, &dest)?;
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, dest)
}

#[cfg(unix)]
fn drop_write_bits(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() & !0o222);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn drop_write_bits(path: &Path) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_file_content_and_drops_write_bit() {
        let project = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        std::fs::write(project.path().join("LICENSE"), b"MIT").unwrap();

        let copyfile = CopyFile { src: "LICENSE".to_string(), dest: "LICENSE".to_string() };
        materialize_copyfile(project.path(), workspace.path(), &copyfile).unwrap();

        let dest = workspace.path().join("LICENSE");
        assert_eq!(std::fs::read(&dest).unwrap(), b"MIT");
    }

    #[test]
    fn rejects_escaping_copyfile_source() {
        let project = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        let copyfile = CopyFile { src: "../../../etc/passwd".to_string(), dest: "stolen".to_string() };
        assert!(materialize_copyfile(project.path(), workspace.path(), &copyfile).is_err());
    }

    #[test]
    fn creates_relative_symlink_for_linkfile() {
        let project = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        std::fs::write(project.path().join("tool.sh"), b"#!/bin/sh\n").unwrap();

        let linkfile = LinkFile { src: "tool.sh".to_string(), dest: "hooks/tool.sh".to_string() };
        materialize_linkfile(project.path(), workspace.path(), &linkfile).unwrap();

        let dest = workspace.path().join("hooks/tool.sh");
        assert!(dest.symlink_metadata().unwrap().file_type().is_symlink());
    }
}
