//! SSH Multiplexer (C4): one OpenSSH ControlMaster per `(host, port)`,
//! shared across every project fetched over an ssh-ish URL.
//!
//! This is the one piece of genuinely process-wide mutable state in the
//! crate; every other cache or config value is an explicit context object
//! threaded through calls instead.

use std::collections::{HashMap, HashSet};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::git::url;

type HostPort = (String, Option<u16>);

struct MultiplexerState {
    live: HashSet<HostPort>,
    masters: Vec<Child>,
    clients: HashMap<u32, Child>,
    socket_dir: std::path::PathBuf,
}

pub struct SshMultiplexer {
    state: Mutex<MultiplexerState>,
}

static INSTANCE: OnceLock<SshMultiplexer> = OnceLock::new();

impl SshMultiplexer {
    /// The process-wide instance, created lazily on first use.
    pub fn global() -> &'static SshMultiplexer {
        INSTANCE.get_or_init(|| {
            let socket_dir = std::env::temp_dir().join(format!("fleetsync-ssh-{}", std::process::id()));
            let _ = std::fs::create_dir_all(&socket_dir);
            SshMultiplexer {
                state: Mutex::new(MultiplexerState {
                    live: HashSet::new(),
                    masters: Vec::new(),
                    clients: HashMap::new(),
                    socket_dir,
                }),
            }
        })
    }

    /// Preconnect a ControlMaster for `url` if it is ssh-ish and none is live
    /// yet for its `(host, port)` key. Returns `true` if multiplexing is now
    /// in effect (either an existing master was found, or a new one spawned
    /// and verified alive); `false` on non-ssh URLs or non-unix platforms.
    pub fn preconnect(&self, target: &str) -> bool {
        if !url::is_ssh_like(target) {
            return false;
        }
        let Some(key) = url::ssh_host_port(target) else {
            return false;
        };

        if !cfg!(unix) {
            return false;
        }

        let mut state = self.state.lock().expect("ssh multiplexer mutex poisoned");
        if state.live.contains(&key) {
            return true;
        }

        let sock_path = self.control_path(&state.socket_dir, &key);

        if Self::master_already_running(&sock_path, &key.0, key.1) {
            state.live.insert(key);
            return true;
        }

        match Self::spawn_master(&sock_path, &key.0, key.1) {
            Some(child) => {
                state.masters.push(child);
                state.live.insert(key);
                true
            }
            None => false,
        }
    }

    fn control_path(&self, socket_dir: &std::path::Path, key: &HostPort) -> std::path::PathBuf {
        let label = match key.1 {
            Some(port) => format!("{}-{}", key.0, port),
            None => key.0.clone(),
        };
        socket_dir.join(label)
    }

    fn master_already_running(sock_path: &std::path::Path, host: &str, port: Option<u16>) -> bool {
        let mut cmd = Command::new("ssh");
        cmd.arg("-O").arg("check").arg("-o").arg(format!("ControlPath={}", sock_path.display()));
        if let Some(port) = port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(host);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        crate::shell_exec::run(&mut cmd, None, None)
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn spawn_master(sock_path: &std::path::Path, host: &str, port: Option<u16>) -> Option<Child> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-M").arg("-N").arg("-o").arg(format!("ControlPath={}", sock_path.display()));
        if let Some(port) = port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(host);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

        log::debug!("$ ssh -M -N -o ControlPath={} {host}", sock_path.display());
        let mut child = cmd.spawn().ok()?;
        std::thread::sleep(Duration::from_secs(1));
        match child.try_wait() {
            Ok(None) => Some(child),
            _ => None,
        }
    }

    /// Register a client process so [`Self::close`] can wait for it.
    pub fn add_client(&self, pid: u32, child: Child) {
        self.state.lock().expect("ssh multiplexer mutex poisoned").clients.insert(pid, child);
    }

    /// Remove a client previously registered with [`Self::add_client`].
    pub fn remove_client(&self, pid: u32) {
        self.state.lock().expect("ssh multiplexer mutex poisoned").clients.remove(&pid);
    }

    /// Terminate every client, then every master, then remove the socket dir.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("ssh multiplexer mutex poisoned");
        for (_, mut child) in state.clients.drain() {
            Self::terminate(&mut child);
        }
        for mut master in state.masters.drain(..) {
            Self::terminate(&mut master);
        }
        let _ = std::fs::remove_dir_all(&state.socket_dir);
        state.live.clear();
    }

    #[cfg(unix)]
    fn terminate(child: &mut Child) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
        let _ = child.wait();
    }

    #[cfg(not(unix))]
    fn terminate(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ssh_url_never_preconnects() {
        let mux = SshMultiplexer::global();
        assert!(!mux.preconnect("https://example.com/team/repo.git"));
    }
}
