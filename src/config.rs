use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_POLL_SECONDS: u64 = 5;
const MIN_POLL_SECONDS: u64 = 1;
const CONFIG_SCHEMA_VERSION: u32 = 2;
const CONFIG_FILE: &str = "nsgtt-config.json";
const DATABASE_FILE: &str = "time_played.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    pub schema_version: u32,
    /// Steam installation root; discovered when unset.
    pub steam_root: Option<String>,
    /// Numeric account folder under `userdata`; the most recently used one
    /// is picked when unset.
    pub steam_user_id: Option<String>,
    pub poll_seconds: u64,
    pub database_path: Option<String>,
    /// Folder holding Steam note files for the daemon.
    pub notes_dir: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            steam_root: None,
            steam_user_id: None,
            poll_seconds: DEFAULT_POLL_SECONDS,
            database_path: None,
            notes_dir: None,
        }
    }
}

/// Values resolved once at startup and handed to every action.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub home: PathBuf,
    pub poll_interval: Duration,
    pub database_path: PathBuf,
}

impl TrackerConfig {
    pub fn load_or_init(home: &Path) -> Result<Self> {
        let cfg_path = config_path(home);
        fs::create_dir_all(home)
            .with_context(|| format!("failed to create config directory {}", home.display()))?;

        if cfg_path.exists() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: TrackerConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save(home)?;
            }
            Ok(parsed)
        } else {
            let cfg = TrackerConfig::default();
            cfg.save(home)?;
            Ok(cfg)
        }
    }

    pub fn save(&self, home: &Path) -> Result<()> {
        let path = config_path(home);
        let data = serde_json::to_string_pretty(self)?;
        crate::util::write_atomic(&path, data.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn runtime_settings(&self, home: &Path) -> RuntimeSettings {
        let poll_seconds = env_u64("NSGTT_POLL_SECONDS")
            .unwrap_or(self.poll_seconds)
            .max(MIN_POLL_SECONDS);
        let database_path = self
            .database_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(DATABASE_FILE));
        RuntimeSettings {
            home: home.to_path_buf(),
            poll_interval: Duration::from_secs(poll_seconds),
            database_path,
        }
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }
        if self.poll_seconds < MIN_POLL_SECONDS {
            self.poll_seconds = DEFAULT_POLL_SECONDS;
            changed = true;
        }
        for item in [
            &mut self.steam_root,
            &mut self.steam_user_id,
            &mut self.database_path,
            &mut self.notes_dir,
        ] {
            if normalize_optional_string(item) {
                changed = true;
            }
        }

        changed
    }
}

/// Data directory for config, database and the daemon lock.
pub fn nsgtt_home() -> PathBuf {
    if let Ok(custom) = env::var("NSGTT_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nsgtt")
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    if let Some(item) = value.as_mut() {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            *value = None;
            return true;
        }
        if *item != trimmed {
            *item = trimmed;
            return true;
        }
    }
    false
}
