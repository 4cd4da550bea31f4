//! Parsing helpers for git's plumbing output: `--version` and
//! `for-each-ref --format=...` lines, the two raw formats the Git Driver (C1)
//! and Ref Cache (C2) depend on.

use crate::error::GitError;

/// One parsed line of `for-each-ref --format="%(objectname)\t%(refname)\t%(symref)"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RefCacheLine {
    pub refname: String,
    pub oid: Option<String>,
    pub symref: Option<String>,
}

const NULL_OID: &str = "0000000000000000000000000000000000000000";

pub(crate) fn parse_for_each_ref_line(line: &str) -> Result<RefCacheLine, GitError> {
    let mut fields = line.splitn(3, '\t');
    let oid = fields
        .next()
        .ok_or_else(|| GitError::Parse(format!("malformed for-each-ref line: {line}")))?;
    let refname = fields
        .next()
        .ok_or_else(|| GitError::Parse(format!("malformed for-each-ref line: {line}")))?;
    let symref = fields.next().unwrap_or("");

    Ok(RefCacheLine {
        refname: refname.to_string(),
        oid: (oid != NULL_OID && !oid.is_empty()).then(|| oid.to_string()),
        symref: (!symref.is_empty()).then(|| symref.to_string()),
    })
}

/// Parse the numeric `major.minor.patch` prefix out of `git version X.Y.Z...`.
pub(crate) fn parse_git_version(text: &str) -> Option<(u32, u32, u32)> {
    let version_str = text.trim().strip_prefix("git version ")?;
    let core = version_str.split_whitespace().next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts
        .next()
        .unwrap_or("0")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    Some((major, minor, patch))
}
