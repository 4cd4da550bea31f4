//! Event Log (C9): a trace2-style newline-delimited JSON log, one record per
//! line, written under an advisory lock so multiple processes sharing a
//! workspace (a `sync` invoked from two shells) can append to one file.
//!
//! Modeled on git's own `GIT_TRACE2_EVENT` format: every record carries a
//! `sid` (session id) and an event tag; per-project timing records carry
//! `name`/`task`/`start`/`finish`/`success` so a run can be reconstructed
//! from the log alone.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;

/// A session id in git trace2's `<tool>-<timestamp>-P<pid-hex>` shape,
/// chained to a parent via `GIT_TRACE2_PARENT_SID` the way git itself does.
pub fn generate_sid(tool: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let pid = std::process::id();
    let own = format!("{tool}-{timestamp}-P{pid:08x}");
    match std::env::var("GIT_TRACE2_PARENT_SID") {
        Ok(parent) if !parent.is_empty() => format!("{parent}/{own}"),
        _ => own,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
#[serde(rename_all = "snake_case")]
enum Event<'a> {
    Version { sid: &'a str, evt: &'static str },
    Start { sid: &'a str, t_abs: f64, argv: &'a [String] },
    DefParam { sid: &'a str, param: &'a str, value: &'a str },
    ChildStart { sid: &'a str, child_id: u32, argv: &'a [String] },
    ChildExit { sid: &'a str, child_id: u32, code: i32, t_rel: f64 },
    Data { sid: &'a str, name: &'a str, task: &'a str, t_start: f64, t_finish: f64, success: bool },
    Error { sid: &'a str, msg: &'a str },
    Exit { sid: &'a str, code: i32, t_rel: f64 },
}

/// A handle to one workspace's event log, serializing writes from this
/// process with a mutex and from other processes with a file lock.
pub struct EventLog {
    path: PathBuf,
    sid: String,
    started_at: std::time::Instant,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn open(path: &Path, tool: &str) -> Self {
        EventLog {
            path: path.to_path_buf(),
            sid: generate_sid(tool),
            started_at: std::time::Instant::now(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    fn t_rel(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn start(&self, argv: &[String]) {
        self.write(&Event::Version { sid: &self.sid, evt: "3" });
        self.write(&Event::Start { sid: &self.sid, t_abs: self.t_rel(), argv });
    }

    pub fn def_param(&self, param: &str, value: &str) {
        self.write(&Event::DefParam { sid: &self.sid, param, value });
    }

    pub fn child_start(&self, child_id: u32, argv: &[String]) {
        self.write(&Event::ChildStart { sid: &self.sid, child_id, argv });
    }

    pub fn child_exit(&self, child_id: u32, code: i32) {
        self.write(&Event::ChildExit { sid: &self.sid, child_id, code, t_rel: self.t_rel() });
    }

    /// Record one project's timed task, as used by the Sync Engine's fetch
    /// and checkout pools.
    pub fn project_task(&self, name: &str, task: &str, t_start: f64, t_finish: f64, success: bool) {
        self.write(&Event::Data {
            sid: &self.sid,
            name,
            task,
            t_start,
            t_finish,
            success,
        });
    }

    pub fn error(&self, msg: &str) {
        self.write(&Event::Error { sid: &self.sid, msg });
    }

    pub fn exit(&self, code: i32) {
        self.write(&Event::Exit { sid: &self.sid, code, t_rel: self.t_rel() });
    }

    fn write(&self, event: &Event) {
        let _guard = self.write_lock.lock().expect("event log mutex poisoned");
        let Ok(line) = serde_json::to_string(event) else { return };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        if file.lock_exclusive().is_err() {
            return;
        }
        let _ = writeln!(file, "{line}");
        let _ = FileExt::unlock(&file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_sid_embeds_tool_name_and_pid() {
        let sid = generate_sid("fleetsync");
        assert!(sid.starts_with("fleetsync-"));
        assert!(sid.contains(&format!("P{:08x}", std::process::id())));
    }

    #[test]
    fn start_and_exit_append_two_parseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let log = EventLog::open(&path, "fleetsync");
        log.start(&["fleetsync".to_string(), "sync".to_string()]);
        log.project_task("foo", "fetch", 0.0, 1.5, true);
        log.exit(0);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["sid"].is_string());
        }
    }
}
