use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOCK_FILE: &str = "nsgtt-daemon.lock";
const META_FILE: &str = "nsgtt-daemon.instance.json";

pub enum AcquireState {
    Acquired(InstanceGuard),
    AlreadyRunning { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    NotRunning,
    Running { pid: Option<u32> },
}

/// Held for the daemon's lifetime; dropping it releases the lock and removes
/// the metadata file if this process still owns it.
pub struct InstanceGuard {
    file: File,
    meta_path: PathBuf,
    pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceMetadata {
    pid: u32,
    exe_path: Option<String>,
    started_at: Option<String>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        remove_instance_metadata_if_owned(self.pid, &self.meta_path);
    }
}

pub fn lock_path(home: &Path) -> PathBuf {
    home.join(LOCK_FILE)
}

pub fn instance_meta_path(home: &Path) -> PathBuf {
    home.join(META_FILE)
}

pub fn acquire_single_instance(home: &Path) -> Result<AcquireState> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create lock directory {}", home.display()))?;

    let lock_path = lock_path(home);
    let meta_path = instance_meta_path(home);
    let mut file = open_lock_file(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            write_pid_compat(&mut file)?;
            let metadata = InstanceMetadata {
                pid: std::process::id(),
                exe_path: env::current_exe()
                    .ok()
                    .map(|path| path.display().to_string()),
                started_at: Some(chrono::Utc::now().to_rfc3339()),
            };
            write_instance_metadata(&meta_path, &metadata)?;
            debug!(pid = metadata.pid, path = %lock_path.display(), "daemon lock acquired");
            Ok(AcquireState::Acquired(InstanceGuard {
                file,
                meta_path,
                pid: metadata.pid,
            }))
        }
        Err(_) => Ok(AcquireState::AlreadyRunning {
            pid: running_pid(&meta_path),
        }),
    }
}

/// Probes the daemon lock without keeping it.
pub fn inspect_running_instance(home: &Path) -> Result<RunningState> {
    let lock_path = lock_path(home);
    if !lock_path.exists() {
        return Ok(RunningState::NotRunning);
    }

    let meta_path = instance_meta_path(home);
    let file = open_lock_file(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            let _ = fs::remove_file(&meta_path);
            Ok(RunningState::NotRunning)
        }
        Err(_) => Ok(RunningState::Running {
            pid: running_pid(&meta_path),
        }),
    }
}

fn running_pid(meta_path: &Path) -> Option<u32> {
    read_instance_metadata(meta_path)
        .ok()
        .flatten()
        .map(|m| m.pid)
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))
}

fn write_pid_compat(file: &mut File) -> Result<()> {
    let pid = std::process::id();
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(pid.to_string().as_bytes())?;
    file.flush()?;
    Ok(())
}

fn write_instance_metadata(path: &Path, metadata: &InstanceMetadata) -> Result<()> {
    let payload = serde_json::to_string_pretty(metadata)?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write instance metadata {}", path.display()))?;
    Ok(())
}

fn read_instance_metadata(path: &Path) -> Result<Option<InstanceMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read instance metadata {}", path.display()))?;
    let parsed: InstanceMetadata = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    Ok(Some(parsed))
}

fn remove_instance_metadata_if_owned(expected_pid: u32, path: &Path) {
    let Ok(Some(metadata)) = read_instance_metadata(path) else {
        return;
    };
    if metadata.pid == expected_pid {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_instance_metadata() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("instance.json");

        let original = InstanceMetadata {
            pid: 1234,
            exe_path: Some("nsgtt".to_string()),
            started_at: None,
        };

        write_instance_metadata(&path, &original).expect("write metadata");
        let loaded = read_instance_metadata(&path)
            .expect("read metadata")
            .expect("metadata value");

        assert_eq!(loaded.pid, 1234);
        assert_eq!(loaded.exe_path.as_deref(), Some("nsgtt"));
    }

    #[test]
    fn second_daemon_sees_the_first_one() {
        let tmp = TempDir::new().expect("temp dir");

        let guard = match acquire_single_instance(tmp.path()).expect("acquire instance") {
            AcquireState::Acquired(guard) => guard,
            AcquireState::AlreadyRunning { .. } => panic!("expected acquired lock"),
        };

        match acquire_single_instance(tmp.path()).expect("second acquire") {
            AcquireState::AlreadyRunning { pid } => assert_eq!(pid, Some(std::process::id())),
            AcquireState::Acquired(_) => panic!("lock must be exclusive"),
        }
        assert_eq!(
            inspect_running_instance(tmp.path()).expect("inspect running"),
            RunningState::Running {
                pid: Some(std::process::id())
            }
        );

        drop(guard);

        assert_eq!(
            inspect_running_instance(tmp.path()).expect("inspect stopped"),
            RunningState::NotRunning
        );
        assert!(!instance_meta_path(tmp.path()).exists());
    }

    #[test]
    fn missing_lock_file_means_not_running() {
        let tmp = TempDir::new().expect("temp dir");
        assert_eq!(
            inspect_running_instance(tmp.path()).expect("inspect"),
            RunningState::NotRunning
        );
    }
}
