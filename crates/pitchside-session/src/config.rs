//! Environment-driven runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Directory the per-target CSV tables live in.
    pub data_dir: PathBuf,
    /// Deadline applied to every bounded backend wait.
    pub deadline: Duration,
    /// Page-script fixture driving the scripted backend.
    pub script_path: Option<PathBuf>,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("PITCHSIDE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            deadline: std::env::var("PITCHSIDE_DEADLINE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(3500)),
            script_path: std::env::var("PITCHSIDE_SCRIPT").ok().map(PathBuf::from),
        }
    }
}
