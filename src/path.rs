//! Path helpers: display formatting and the copy/link anti-escape invariant.

use std::path::{Component, Path, PathBuf};

/// Format a filesystem path for user-facing output, replacing the home
/// directory prefix with `~`.
pub fn format_path_for_display(path: &Path) -> String {
    if let Some(home) = dirs::home_dir()
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        if stripped.as_os_str().is_empty() {
            return "~".to_string();
        }
        let mut display_path = PathBuf::from("~");
        display_path.push(stripped);
        return display_path.display().to_string();
    }
    path.display().to_string()
}

/// Codepoints known to be elided or normalized away by case/width-folding
/// filesystems: zero-width joiner/non-joiner, common bidi overrides, BOM.
const FORBIDDEN_CODEPOINTS: &[char] = &[
    '\u{200D}', '\u{200C}', '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', '\u{FEFF}',
];

/// Why a `<copyfile>`/`<linkfile>` path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathSafetyError {
    #[error("path is absolute: {0}")]
    Absolute(String),
    #[error("path escapes its tree via '..': {0}")]
    ParentEscape(String),
    #[error("path contains forbidden component '{1}': {0}")]
    ForbiddenComponent(String, String),
    #[error("path contains a newline: {0}")]
    Newline(String),
    #[error("path contains a forbidden unicode codepoint: {0}")]
    ForbiddenCodepoint(String),
    #[error("destination path ends in a path separator: {0}")]
    TrailingSeparator(String),
}

/// Validate a raw path string taken from a `<copyfile>`/`<linkfile>` element
/// before any filesystem access happens.
///
/// This is a pure, deterministic check over the path string alone: no
/// filesystem access, no symlink resolution. Symlink-escape checks (reading
/// through a symlink on the way to the destination) are a separate runtime
/// check performed immediately before I/O, since they require the filesystem
/// to exist.
pub fn validate_manifest_path(raw: &str, reject_trailing_separator: bool) -> Result<(), PathSafetyError> {
    if raw.contains('\n') || raw.contains('\r') {
        return Err(PathSafetyError::Newline(raw.to_string()));
    }
    if raw.chars().any(|c| FORBIDDEN_CODEPOINTS.contains(&c)) {
        return Err(PathSafetyError::ForbiddenCodepoint(raw.to_string()));
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(PathSafetyError::Absolute(raw.to_string()));
    }
    if reject_trailing_separator && (raw.ends_with('/') || raw.ends_with('\\')) {
        return Err(PathSafetyError::TrailingSeparator(raw.to_string()));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => return Err(PathSafetyError::ParentEscape(raw.to_string())),
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                if part == "~" || part == ".git" || part.starts_with(".repo") {
                    return Err(PathSafetyError::ForbiddenComponent(
                        raw.to_string(),
                        part.to_string(),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Resolve `dest` relative to `root`, refusing to follow a symlink anywhere
/// along the way. Returns the resolved absolute path, or an error if any
/// ancestor component (that exists) is a symlink or the final path would
/// land outside `root`.
pub fn resolve_inside(root: &Path, dest_relative: &Path) -> std::io::Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in dest_relative.components() {
        resolved.push(component);
        if let Ok(meta) = resolved.symlink_metadata()
            && meta.file_type().is_symlink()
            && resolved != root.join(dest_relative)
        {
            return Err(std::io::Error::other(format!(
                "refusing to traverse symlink at {}",
                resolved.display()
            )));
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::parent_escape("../etc/passwd")]
    #[case::nested_parent_escape("foo/../../etc/passwd")]
    #[case::absolute("/etc/passwd")]
    #[case::dotgit_component("foo/.git/config")]
    #[case::dotrepo_prefix_component(".repo_hidden/x")]
    #[case::newline("foo\nbar")]
    #[case::carriage_return("foo\rbar")]
    #[case::zero_width_joiner("foo\u{200D}bar")]
    #[case::tilde_component("~/secrets")]
    fn rejects_unsafe_manifest_path(#[case] raw: &str) {
        assert!(validate_manifest_path(raw, false).is_err(), "should reject: {raw}");
    }

    #[test]
    fn rejects_parent_escape_with_specific_variant() {
        assert!(matches!(
            validate_manifest_path("../etc/passwd", false),
            Err(PathSafetyError::ParentEscape(_))
        ));
    }

    #[test]
    fn rejects_trailing_separator_for_files() {
        assert!(matches!(
            validate_manifest_path("some/dir/", true),
            Err(PathSafetyError::TrailingSeparator(_))
        ));
    }

    #[rstest]
    #[case::plain_relative("docs/README.md")]
    #[case::nested_relative("a/b/c.txt")]
    #[case::dotfile("src/.gitignore")]
    fn accepts_safe_manifest_path(#[case] raw: &str) {
        assert!(validate_manifest_path(raw, true).is_ok(), "should accept: {raw}");
    }

    #[test]
    fn format_path_for_display_outside_home() {
        let path = PathBuf::from("/definitely/not/under/home/dir");
        assert_eq!(format_path_for_display(&path), path.display().to_string());
    }
}
