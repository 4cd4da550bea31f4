//! Subprocess execution chokepoint.
//!
//! Every external command this crate runs — git itself (C1), an `ssh -M -N`
//! ControlMaster (C4), or a repo hook's entry point (§6 Hook interface) —
//! funnels through [`run`]. Nothing else spawns a `Command`. This keeps
//! logging, timing, and stdin handling in one place.

use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::time::Instant;

/// Execute `cmd`, optionally writing `input` to its stdin, with timing and
/// debug logging.
///
/// ```text
/// $ git fetch origin [libx]               # with context
/// $ ssh -M -N -o ControlPath=... host     # without context
/// [trace] context=libx cmd="..." dur=12.3ms ok=true
/// ```
///
/// `context` is typically the project name for per-project git commands, or
/// `None` for process-wide commands like an SSH ControlMaster.
pub fn run(cmd: &mut Command, input: Option<&[u8]>, context: Option<&str>) -> std::io::Result<Output> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
    let cmd_str = if args.is_empty() {
        program
    } else {
        format!("{program} {}", args.join(" "))
    };

    match context {
        Some(ctx) => log::debug!("$ {cmd_str} [{ctx}]"),
        None => log::debug!("$ {cmd_str}"),
    }

    if input.is_some() {
        cmd.stdin(Stdio::piped());
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let t0 = Instant::now();
    let result = spawn_and_feed(cmd, input);
    let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;

    match (&result, context) {
        (Ok(output), Some(ctx)) => log::debug!(
            "[trace] context={ctx} cmd=\"{cmd_str}\" dur={duration_ms:.1}ms ok={}",
            output.status.success()
        ),
        (Ok(output), None) => log::debug!(
            "[trace] cmd=\"{cmd_str}\" dur={duration_ms:.1}ms ok={}",
            output.status.success()
        ),
        (Err(e), Some(ctx)) => log::debug!("[trace] context={ctx} cmd=\"{cmd_str}\" dur={duration_ms:.1}ms err=\"{e}\""),
        (Err(e), None) => log::debug!("[trace] cmd=\"{cmd_str}\" dur={duration_ms:.1}ms err=\"{e}\""),
    }

    result
}

fn spawn_and_feed(cmd: &mut Command, input: Option<&[u8]>) -> std::io::Result<Output> {
    let Some(bytes) = input else {
        return cmd.output();
    };

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(bytes)?;
    }
    child.wait_with_output()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_command_without_context() {
        let mut cmd = Command::new("true");
        let output = run(&mut cmd, None, None).expect("spawn true");
        assert!(output.status.success());
    }

    #[test]
    fn feeds_stdin_bytes_to_child() {
        let mut cmd = Command::new("cat");
        let output = run(&mut cmd, Some(b"hello"), Some("test")).expect("spawn cat");
        assert_eq!(output.stdout, b"hello");
    }
}
