// Elevated worker configuration loaded from the per-user config directory.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::ipc::PIPE_NAME;

const CONFIG_DIR_NAME: &str = "EnergyPerformance";
const CONFIG_FILE_NAME: &str = "elevated.json";

/// Worker settings. Every field has a default; the config file may set
/// any subset of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Pipe path the command channel listens on.
    pub pipe_name: String,
    /// Bound on one accept wait, in milliseconds; stop() latency is at
    /// most one interval.
    pub accept_poll_ms: u64,
    /// Size of the reduced efficiency-core set used by the
    /// MoveAllAppsToSomeEfficiencyCores command.
    pub some_efficiency_core_count: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipe_name: PIPE_NAME.to_string(),
            accept_poll_ms: 500,
            some_efficiency_core_count: 2,
        }
    }
}

/// Load the config file if present; defaults otherwise. A malformed file
/// is logged and ignored rather than blocking worker startup.
pub fn load() -> ServiceConfig {
    let Some(path) = config_path() else {
        return ServiceConfig::default();
    };
    if !path.exists() {
        return ServiceConfig::default();
    }

    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => {
                info!("[CONFIG] Loaded {:?}", path);
                config
            }
            Err(e) => {
                warn!("[CONFIG] Ignoring malformed {:?}: {}", path, e);
                ServiceConfig::default()
            }
        },
        Err(e) => {
            warn!("[CONFIG] Failed to read {:?}: {}", path, e);
            ServiceConfig::default()
        }
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
