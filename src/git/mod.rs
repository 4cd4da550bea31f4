//! Git Driver (C1): the single chokepoint through which every git subprocess
//! is invoked.
//!
//! Exposes a small set of typed operations plus an escape hatch for the rest.
//! Nothing else in the crate spawns a `git` `Command`.

mod parse;
pub mod url;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::GitError;
use crate::ssh::SshMultiplexer;

pub(crate) use parse::{RefCacheLine, parse_for_each_ref_line};

/// Environment variables that must never leak from the driver's own process
/// into a spawned git subprocess; each one redirects git at state left over
/// from an unrelated repository.
const STRIPPED_ENV_VARS: &[&str] = &[
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_OBJECT_DIRECTORY",
    "GIT_ALTERNATE_OBJECT_DIRECTORIES",
    "GIT_GRAFT_FILE",
    "GIT_TRACE2_EVENT",
];

/// The minimum git versions this driver is willing to work with.
const GIT_VERSION_HARD_MIN: (u32, u32, u32) = (2, 19, 0);
const GIT_VERSION_SOFT_MIN: (u32, u32, u32) = (2, 30, 0);

/// Options governing a single git invocation. Mirrors the teacher's use of a
/// small options struct rather than a long positional argument list.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub gitdir: Option<PathBuf>,
    pub worktree: Option<PathBuf>,
    pub objdir: Option<PathBuf>,
    pub bare: bool,
    pub disable_editor: bool,
    pub merge_stderr_into_stdout: bool,
    pub input: Option<Vec<u8>>,
}

pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl GitOutput {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

static VERSION: OnceLock<(u32, u32, u32)> = OnceLock::new();

/// Invoke git once to discover its version, memoized for the process lifetime.
pub fn git_version() -> Result<(u32, u32, u32), GitError> {
    if let Some(v) = VERSION.get() {
        return Ok(*v);
    }
    let out = run_raw(&["--version"], &RunOptions::default(), None)?;
    let text = out.stdout_utf8();
    let v = parse::parse_git_version(&text)
        .ok_or_else(|| GitError::Parse(format!("could not parse `git --version` output: {text}")))?;
    if v < GIT_VERSION_HARD_MIN {
        return Err(GitError::Parse(format!(
            "git {v:?} is older than the minimum supported version {GIT_VERSION_HARD_MIN:?}"
        )));
    }
    if v < GIT_VERSION_SOFT_MIN {
        log::warn!("git {v:?} is older than the recommended minimum {GIT_VERSION_SOFT_MIN:?}");
    }
    Ok(*VERSION.get_or_init(|| v))
}

/// Run a git subcommand with the given options. This is the only entry point
/// that builds a sanitized environment and funnels through the timing/logging
/// chokepoint in [`crate::shell_exec::run`].
pub fn run(args: &[&str], options: &RunOptions, ssh: Option<&SshMultiplexer>) -> Result<GitOutput, GitError> {
    run_raw(args, options, ssh)
}

fn run_raw(args: &[&str], options: &RunOptions, ssh: Option<&SshMultiplexer>) -> Result<GitOutput, GitError> {
    if let (Some(ssh), Some(url)) = (ssh, args.iter().find(|a| url::is_ssh_like(a))) {
        ssh.preconnect(url);
    }

    let mut cmd = Command::new("git");
    cmd.args(args);

    let env = sanitized_env(options);
    cmd.env_clear();
    cmd.envs(env);

    if options.bare
        && let Some(gitdir) = &options.gitdir
    {
        cmd.env("GIT_DIR", gitdir);
    } else if let Some(worktree) = &options.worktree {
        cmd.current_dir(worktree);
        if let Some(gitdir) = &options.gitdir {
            cmd.env("GIT_DIR", gitdir);
            cmd.env("GIT_WORK_TREE", worktree);
        }
    } else if let Some(gitdir) = &options.gitdir {
        cmd.current_dir(gitdir);
    }

    if let Some(objdir) = &options.objdir {
        let default_objdir = options.gitdir.as_ref().map(|g| g.join("objects"));
        if default_objdir.as_deref() != Some(objdir.as_path()) {
            cmd.env("GIT_OBJECT_DIRECTORY", objdir);
            if let Some(gitdir) = &options.gitdir {
                cmd.env("GIT_ALTERNATE_OBJECT_DIRECTORIES", gitdir.join("objects"));
            }
        } else {
            cmd.env("GIT_OBJECT_DIRECTORY", objdir);
        }
    }

    if options.disable_editor {
        cmd.env("GIT_EDITOR", ":");
    }

    if matches!(args.first(), Some(&"fetch") | Some(&"clone"))
        && !args.contains(&"--quiet")
        && !args.iter().any(|a| a.starts_with("--progress"))
        && std::io::IsTerminal::is_terminal(&std::io::stderr())
    {
        cmd.arg("--progress");
    }

    let output = crate::shell_exec::run(&mut cmd, options.input.as_deref(), None)?;

    let (stdout, stderr) = if options.merge_stderr_into_stdout {
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        (combined, Vec::new())
    } else {
        (output.stdout, output.stderr)
    };

    Ok(GitOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Build the subprocess environment from scratch: a copy of the process
/// environment with the variables in [`STRIPPED_ENV_VARS`] removed, so a
/// caller's ambient `GIT_DIR`/`GIT_INDEX_FILE` never leaks into a driver
/// invocation that targets a different gitdir.
fn sanitized_env(_options: &RunOptions) -> HashMap<String, String> {
    sanitize_env_vars(std::env::vars())
}

fn sanitize_env_vars(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter(|(k, _)| !STRIPPED_ENV_VARS.contains(&k.as_str())).collect()
}

/// Run git and require success, wrapping a non-zero exit in [`GitError::CommandFailed`].
pub fn run_checked(args: &[&str], options: &RunOptions, ssh: Option<&SshMultiplexer>) -> Result<GitOutput, GitError> {
    let out = run(args, options, ssh)?;
    if !out.ok() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: out.stderr_utf8_or_lossy(),
            git_rc: out.exit_code,
        });
    }
    Ok(out)
}

impl GitOutput {
    fn stderr_utf8_or_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// `for-each-ref`-backed ref enumeration used by the Ref Cache (C2); lives here
/// because it is just another typed git operation.
pub fn for_each_ref(gitdir: &Path) -> Result<Vec<RefCacheLine>, GitError> {
    let options = RunOptions {
        gitdir: Some(gitdir.to_path_buf()),
        bare: true,
        ..Default::default()
    };
    let out = run_checked(
        &["for-each-ref", "--format=%(objectname)\t%(refname)\t%(symref)"],
        &options,
        None,
    )?;
    out.stdout_utf8()
        .lines()
        .map(parse_for_each_ref_line)
        .collect::<Result<Vec<_>, _>>()
}

pub fn symbolic_ref_head(gitdir: &Path) -> Result<Option<String>, GitError> {
    let options = RunOptions {
        gitdir: Some(gitdir.to_path_buf()),
        bare: true,
        ..Default::default()
    };
    let out = run(&["symbolic-ref", "-q", "HEAD"], &options, None)?;
    if !out.ok() {
        return Ok(None);
    }
    Ok(Some(out.stdout_utf8().trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_env_strips_git_dir() {
        let vars = vec![
            ("GIT_DIR".to_string(), "/tmp/should-not-leak".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let env = sanitize_env_vars(vars.into_iter());
        assert!(!env.contains_key("GIT_DIR"));
        assert!(env.contains_key("PATH"));
    }
}
