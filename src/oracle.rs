//! Fetch-Time Oracle (C5): a persisted EWMA of per-project fetch durations,
//! used to schedule the slowest projects first and tighten the critical path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ALPHA: f64 = 0.5;
const DEFAULT_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FetchTimeOracle {
    #[serde(flatten)]
    estimates: HashMap<String, f64>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    observed_this_session: std::collections::HashSet<String>,
}

impl FetchTimeOracle {
    /// Load `.repo/.repo_fetchtimes.json`, or start empty if it is missing or
    /// unparseable — a corrupt file is silently treated as "no history".
    pub fn load(path: &Path) -> Self {
        let estimates = std::fs::read_to_string(path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        FetchTimeOracle {
            estimates,
            path: path.to_path_buf(),
            observed_this_session: std::collections::HashSet::new(),
        }
    }

    /// The current estimate for `project`, or [`DEFAULT_SECONDS`] so unseen
    /// projects schedule early (longest-first).
    pub fn get(&self, project: &str) -> f64 {
        *self.estimates.get(project).unwrap_or(&DEFAULT_SECONDS)
    }

    /// Fold a freshly observed fetch duration into the EWMA for `project`.
    pub fn set(&mut self, project: &str, seconds: f64) {
        self.observed_this_session.insert(project.to_string());
        let updated = match self.estimates.get(project) {
            Some(prev) => ALPHA * seconds + (1.0 - ALPHA) * prev,
            None => seconds,
        };
        self.estimates.insert(project.to_string(), updated.max(0.0));
    }

    /// Persist the oracle, keeping only projects observed in this session.
    pub fn save(&mut self) -> std::io::Result<()> {
        self.estimates.retain(|name, _| self.observed_this_session.contains(name));
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.estimates)?;
        std::fs::write(&self.path, json)
    }

    /// Sort `projects` descending by expected fetch duration, so the slowest
    /// project starts first.
    pub fn order_longest_first(&self, projects: &mut [String]) {
        projects.sort_by(|a, b| self.get(b).partial_cmp(&self.get(a)).unwrap_or(std::cmp::Ordering::Equal));
    }
}
