use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::config::TrackerConfig;

/// Steam's own app id for the notes feature; note files live in its
/// `remote` folder.
const NOTES_APP_ID: &str = "2371090";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteamAccount {
    pub root: PathBuf,
    pub user_id: String,
    pub user_dir: PathBuf,
}

impl SteamAccount {
    pub fn shortcuts_path(&self) -> PathBuf {
        self.user_dir.join("config").join("shortcuts.vdf")
    }

    pub fn default_notes_dir(&self) -> PathBuf {
        self.user_dir.join(NOTES_APP_ID).join("remote")
    }
}

/// Resolves the Steam root and the account whose shortcuts are managed.
pub fn discover(config: &TrackerConfig) -> Result<SteamAccount> {
    let candidates = steam_root_candidates(config);
    let Some(root) = candidates
        .iter()
        .find(|candidate| candidate.join("userdata").is_dir())
        .cloned()
    else {
        let tried = candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("no Steam installation with a userdata folder found (tried: {tried})");
    };

    let (user_id, user_dir) = pick_user(&root.join("userdata"), config.steam_user_id.as_deref())?;
    Ok(SteamAccount {
        root,
        user_id,
        user_dir,
    })
}

/// Notes folder for the daemon: configured value, else Steam's folder when it
/// exists.
pub fn notes_dir(config: &TrackerConfig, account: &SteamAccount) -> Option<PathBuf> {
    if let Some(custom) = config.notes_dir.as_deref() {
        return Some(PathBuf::from(custom));
    }
    let default = account.default_notes_dir();
    default.is_dir().then_some(default)
}

pub fn steam_root_candidates(config: &TrackerConfig) -> Vec<PathBuf> {
    let mut ordered: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    if let Some(custom) = config.steam_root.as_deref() {
        push_unique_path(&mut ordered, &mut seen, PathBuf::from(custom));
    }
    if let Some(custom) = env::var_os("STEAM_ROOT") {
        push_unique_path(&mut ordered, &mut seen, PathBuf::from(custom));
    }

    #[cfg(windows)]
    {
        for var in ["ProgramFiles(x86)", "ProgramFiles"] {
            if let Some(base) = env::var_os(var) {
                push_unique_path(&mut ordered, &mut seen, PathBuf::from(base).join("Steam"));
            }
        }
        push_unique_path(
            &mut ordered,
            &mut seen,
            PathBuf::from(r"C:\Program Files (x86)\Steam"),
        );
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            push_unique_path(
                &mut ordered,
                &mut seen,
                home.join("Library/Application Support/Steam"),
            );
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        if let Some(home) = dirs::home_dir() {
            for relative in [
                ".steam/steam",
                ".local/share/Steam",
                ".steam/root",
                ".var/app/com.valvesoftware.Steam/.local/share/Steam",
            ] {
                push_unique_path(&mut ordered, &mut seen, home.join(relative));
            }
        }
    }

    ordered
}

/// Picks the configured account, or the one whose shortcut list (or folder)
/// changed most recently.
fn pick_user(userdata: &Path, preferred: Option<&str>) -> Result<(String, PathBuf)> {
    if let Some(id) = preferred {
        let dir = userdata.join(id);
        if !dir.is_dir() {
            bail!("configured Steam user {id} has no folder at {}", dir.display());
        }
        return Ok((id.to_string(), dir));
    }

    let entries = fs::read_dir(userdata)
        .with_context(|| format!("failed to list {}", userdata.display()))?;

    let mut best: Option<(bool, SystemTime, String, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        // "0" is the anonymous account Steam creates before login.
        if name == "0" || !name.chars().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let shortcuts = dir.join("config").join("shortcuts.vdf");
        let has_shortcuts = shortcuts.is_file();
        let touched = modified_time(if has_shortcuts { &shortcuts } else { &dir });
        debug!(user = %name, has_shortcuts, "found Steam account folder");

        let candidate = (has_shortcuts, touched, name, dir);
        let better = match &best {
            None => true,
            Some((best_has, best_touched, _, _)) => {
                (candidate.0, candidate.1) > (*best_has, *best_touched)
            }
        };
        if better {
            best = Some(candidate);
        }
    }

    match best {
        Some((_, _, id, dir)) => Ok((id, dir)),
        None => bail!("no Steam account folders under {}", userdata.display()),
    }
}

fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn push_unique_path(paths: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, candidate: PathBuf) {
    if candidate.as_os_str().is_empty() {
        return;
    }
    if seen.insert(candidate.clone()) {
        paths.push(candidate);
    }
}
