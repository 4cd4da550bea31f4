//! Config (C12, part of the CLI/Config pairing): two layers of TOML state.
//!
//! A user-level file (`~/.config/fleetsync/config.toml`) carries defaults
//! that apply across every workspace on the machine — job counts, retry
//! budgets, hook approval decisions. A workspace-level file
//! (`<top>/.repo/config.toml`) carries the state `init` declared for that
//! one workspace — the manifest URL and branch a bare `sync` should use.
//!
//! Both layers are read-modify-write under an advisory file lock (`fs2`),
//! since a hook approval or a concurrent `init`/`sync` could otherwise race.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

/// Defaults that apply across every workspace, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub retry_fetches: Option<u32>,
    #[serde(default)]
    pub use_clone_bundle: Option<bool>,
    /// Hook approvals keyed by a stable content hash, per §6's "Approval
    /// persists per manifest-URL or per hook-content-hash" rule.
    #[serde(default)]
    pub approved_hooks: Vec<String>,
}

impl UserConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fleetsync").join("config.toml"))
    }

    pub fn is_hook_approved(&self, content_hash: &str) -> bool {
        self.approved_hooks.iter().any(|h| h == content_hash)
    }

    pub fn approve_hook(&mut self, content_hash: &str) {
        if !self.is_hook_approved(content_hash) {
            self.approved_hooks.push(content_hash.to_string());
        }
    }
}

/// The state `init` recorded for one workspace: enough to re-run `sync`
/// with no arguments.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub manifest_branch: Option<String>,
    #[serde(default)]
    pub manifest_name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub mirror: bool,
}

impl WorkspaceConfig {
    pub fn path_for(top: &Path) -> PathBuf {
        top.join(".repo").join("config.toml")
    }
}

/// Read `path` as TOML under a shared lock, falling back to `T::default()`
/// if the file does not exist or fails to parse.
pub fn load<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    let Ok(mut file) = OpenOptions::new().read(true).open(path) else {
        return T::default();
    };
    if file.lock_shared().is_err() {
        return T::default();
    }
    let mut contents = String::new();
    let read_ok = file.read_to_string(&mut contents).is_ok();
    let _ = FileExt::unlock(&file);
    if !read_ok {
        return T::default();
    }
    toml::from_str(&contents).unwrap_or_default()
}

/// Read-modify-write `path` under an exclusive lock: load the current value,
/// hand it to `mutate`, then persist the result. Creates parent directories
/// and the file itself if missing.
pub fn update<T, F>(path: &Path, mutate: F) -> std::io::Result<()>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
    F: FnOnce(&mut T),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
    file.lock_exclusive()?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let mut value: T = toml::from_str(&contents).unwrap_or_default();
    mutate(&mut value);

    let serialized = toml::to_string_pretty(&value).map_err(|e| std::io::Error::other(e.to_string()))?;
    file.set_len(0)?;
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;

    FileExt::unlock(&file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_config_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config: UserConfig = load(&path);
        assert_eq!(config.jobs, None);
    }

    #[test]
    fn update_round_trips_hook_approval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        update::<UserConfig, _>(&path, |c| c.approve_hook("abc123")).unwrap();
        let reloaded: UserConfig = load(&path);
        assert!(reloaded.is_hook_approved("abc123"));
    }

    #[test]
    fn workspace_config_path_is_under_dot_repo() {
        let top = PathBuf::from("/tmp/workspace");
        assert_eq!(WorkspaceConfig::path_for(&top), top.join(".repo/config.toml"));
    }
}
