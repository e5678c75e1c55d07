use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::rewriter::{build_wrapped, extract_original_raw, is_wrapped, parent_dir, quote, unquote};
use crate::shortcuts::{ShortcutRecord, ShortcutsFile};
use crate::util::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Uninstall,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rewritten,
    AlreadyWrapped,
    NotWrapped,
    /// The game executable is not on disk; the record is left alone.
    MissingExecutable(String),
    /// Wrapped, but not in the `<tool> --run <game>` shape.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    pub index: usize,
    pub app_name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub action: Action,
    pub shortcuts_path: PathBuf,
    pub file_found: bool,
    pub backup_path: PathBuf,
    pub backup_created: bool,
    pub changes: Vec<RecordChange>,
    pub written: bool,
}

impl InstallReport {
    pub fn rewritten(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| change.outcome == Outcome::Rewritten)
            .count()
    }
}

pub fn backup_path_for(shortcuts_path: &Path) -> PathBuf {
    let mut name = shortcuts_path
        .file_name()
        .unwrap_or_default()
        .to_os_string();
    name.push(".backup");
    shortcuts_path.with_file_name(name)
}

/// Wraps every shortcut whose executable exists and is not wrapped yet.
pub fn install(shortcuts_path: &Path, tool_path: &Path) -> Result<InstallReport> {
    let tool = tool_path.to_string_lossy().to_string();
    apply_to_file(shortcuts_path, Action::Install, |file| {
        install_records(file, &tool, |path| path.is_file())
    })
}

/// Restores every wrapped shortcut whose original executable still exists.
pub fn uninstall(shortcuts_path: &Path) -> Result<InstallReport> {
    apply_to_file(shortcuts_path, Action::Uninstall, |file| {
        uninstall_records(file, |path| path.is_file())
    })
}

pub fn install_records(
    file: &mut ShortcutsFile,
    tool_path: &str,
    exists: impl Fn(&Path) -> bool,
) -> Vec<RecordChange> {
    file.records
        .iter_mut()
        .map(|record| {
            let outcome = install_record(record, tool_path, &exists);
            change(record, outcome)
        })
        .collect()
}

pub fn uninstall_records(
    file: &mut ShortcutsFile,
    exists: impl Fn(&Path) -> bool,
) -> Vec<RecordChange> {
    file.records
        .iter_mut()
        .map(|record| {
            let outcome = uninstall_record(record, &exists);
            change(record, outcome)
        })
        .collect()
}

fn install_record(
    record: &mut ShortcutRecord,
    tool_path: &str,
    exists: &impl Fn(&Path) -> bool,
) -> Outcome {
    if is_wrapped(&record.exe) {
        return Outcome::AlreadyWrapped;
    }
    let original = unquote(&record.exe).to_string();
    if original.is_empty() || !exists(Path::new(&original)) {
        return Outcome::MissingExecutable(original);
    }

    let start_dir = parent_dir(&original)
        .map(quote)
        .or_else(|| (!record.start_dir.trim().is_empty()).then(|| record.start_dir.clone()))
        .or_else(|| parent_dir(tool_path).map(quote));
    record.exe = build_wrapped(tool_path, &original);
    if let Some(start_dir) = start_dir {
        record.start_dir = start_dir;
    }
    Outcome::Rewritten
}

fn uninstall_record(record: &mut ShortcutRecord, exists: &impl Fn(&Path) -> bool) -> Outcome {
    if !is_wrapped(&record.exe) {
        return Outcome::NotWrapped;
    }
    let Some(original) = extract_original_raw(&record.exe) else {
        return Outcome::Unrecognized;
    };
    if !exists(Path::new(&original)) {
        return Outcome::MissingExecutable(original);
    }

    // Steam quotes every Exe it writes, with or without spaces.
    record.exe = quote(&original);
    if let Some(dir) = parent_dir(&original) {
        record.start_dir = quote(dir);
    }
    Outcome::Rewritten
}

fn change(record: &ShortcutRecord, outcome: Outcome) -> RecordChange {
    RecordChange {
        index: record.index,
        app_name: record.app_name.clone(),
        outcome,
    }
}

fn apply_to_file(
    shortcuts_path: &Path,
    action: Action,
    rewrite: impl FnOnce(&mut ShortcutsFile) -> Vec<RecordChange>,
) -> Result<InstallReport> {
    let backup_path = backup_path_for(shortcuts_path);
    let mut report = InstallReport {
        action,
        shortcuts_path: shortcuts_path.to_path_buf(),
        file_found: false,
        backup_path: backup_path.clone(),
        backup_created: false,
        changes: Vec::new(),
        written: false,
    };

    if !shortcuts_path.is_file() {
        warn!(path = %shortcuts_path.display(), action = action.label(), "shortcut list not found; nothing to do");
        return Ok(report);
    }
    report.file_found = true;

    let raw = fs::read(shortcuts_path)
        .with_context(|| format!("failed to read {}", shortcuts_path.display()))?;
    let mut file = ShortcutsFile::decode(&raw)
        .with_context(|| format!("failed to parse {}", shortcuts_path.display()))?;

    // The backup must describe the list before the first rewrite, so an
    // existing one is never replaced.
    if backup_path.exists() {
        debug!(path = %backup_path.display(), "keeping existing backup");
    } else {
        write_atomic(&backup_path, &raw)
            .with_context(|| format!("failed to write backup {}", backup_path.display()))?;
        report.backup_created = true;
        info!(path = %backup_path.display(), "backup written");
    }

    report.changes = rewrite(&mut file);
    for change in &report.changes {
        debug!(index = change.index, app = %change.app_name, outcome = ?change.outcome, "shortcut processed");
    }

    if report.rewritten() > 0 {
        write_atomic(shortcuts_path, &file.encode())
            .with_context(|| format!("failed to write {}", shortcuts_path.display()))?;
        report.written = true;
        info!(
            path = %shortcuts_path.display(),
            action = action.label(),
            rewritten = report.rewritten(),
            "shortcut list updated"
        );
    }

    Ok(report)
}
