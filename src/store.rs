use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::util::write_atomic;

/// Accumulated play time for one game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GameTimeRecord {
    pub time_played_seconds: f64,
    pub play_count: u32,
}

impl GameTimeRecord {
    /// Adds one finished session. Negative or non-finite lengths count as zero
    /// so the total never decreases.
    pub fn add_session(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.time_played_seconds += seconds;
        }
        self.play_count = self.play_count.saturating_add(1);
    }
}

/// Keyed play time storage shared by the daemon and one-shot runs.
pub trait PlaytimeStore {
    /// Returns the stored record, or a zeroed one for unknown games.
    fn get(&self, game: &str) -> Result<GameTimeRecord>;

    fn put(&mut self, game: &str, record: &GameTimeRecord) -> Result<()>;

    fn all(&self) -> Result<Vec<(String, GameTimeRecord)>>;

    /// Adds a finished session to the latest stored value and returns the
    /// updated record.
    fn record_session(&mut self, game: &str, seconds: f64) -> Result<GameTimeRecord> {
        let mut record = self.get(game)?;
        record.add_session(seconds);
        self.put(game, &record)?;
        Ok(record)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    games: BTreeMap<String, GameTimeRecord>,
}

/// JSON file store. Every access holds an `fs2` lock on a sibling `.lock`
/// file so concurrent processes serialise their read-modify-write cycles.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    lock_path: PathBuf,
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLock> {
        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("failed to open lock file {}", self.lock_path.display()))?;
        if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        }
        .with_context(|| format!("failed to lock {}", self.lock_path.display()))?;
        Ok(StoreLock { file })
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", self.path.display()))
    }

    fn save(&self, data: &StoreFile) -> Result<()> {
        let payload = serde_json::to_string_pretty(data)?;
        write_atomic(&self.path, payload.as_bytes())
    }

    fn modify<T>(&self, apply: impl FnOnce(&mut StoreFile) -> T) -> Result<T> {
        let _lock = self.lock(true)?;
        let mut data = self.load()?;
        let out = apply(&mut data);
        self.save(&data)?;
        Ok(out)
    }
}

impl PlaytimeStore for JsonStore {
    fn get(&self, game: &str) -> Result<GameTimeRecord> {
        let _lock = self.lock(false)?;
        Ok(self.load()?.games.get(game).copied().unwrap_or_default())
    }

    fn put(&mut self, game: &str, record: &GameTimeRecord) -> Result<()> {
        self.modify(|data| {
            data.games.insert(game.to_string(), *record);
        })
    }

    fn all(&self) -> Result<Vec<(String, GameTimeRecord)>> {
        let _lock = self.lock(false)?;
        Ok(self.load()?.games.into_iter().collect())
    }

    fn record_session(&mut self, game: &str, seconds: f64) -> Result<GameTimeRecord> {
        self.modify(|data| {
            let record = data.games.entry(game.to_string()).or_default();
            record.add_session(seconds);
            *record
        })
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub games: BTreeMap<String, GameTimeRecord>,
    pub fail_for: Option<String>,
}

#[cfg(test)]
impl PlaytimeStore for MemoryStore {
    fn get(&self, game: &str) -> Result<GameTimeRecord> {
        Ok(self.games.get(game).copied().unwrap_or_default())
    }

    fn put(&mut self, game: &str, record: &GameTimeRecord) -> Result<()> {
        if self.fail_for.as_deref() == Some(game) {
            anyhow::bail!("simulated write failure for {game}");
        }
        self.games.insert(game.to_string(), *record);
        Ok(())
    }

    fn all(&self) -> Result<Vec<(String, GameTimeRecord)>> {
        Ok(self
            .games
            .iter()
            .map(|(name, record)| (name.clone(), *record))
            .collect())
    }
}
