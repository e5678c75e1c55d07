//! Steam note sidecar: a JSON document with a `notes` array. Only the first
//! note is ever touched; other entries and unknown fields are left alone.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde_json::{Value, json};

use crate::store::GameTimeRecord;
use crate::util::{format_hms, format_local_minutes, write_atomic};

/// Note file Steam keeps for a non-Steam shortcut with the given name.
pub fn shortcut_note_path(notes_dir: &Path, app_name: &str) -> PathBuf {
    let sanitized: String = app_name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    notes_dir.join(format!("notes_shortcut_{sanitized}"))
}

pub fn note_title(record: &GameTimeRecord, at: DateTime<Local>) -> String {
    format!(
        "Last session: {} || Time played: {} (played {} times)",
        format_local_minutes(at),
        format_hms(record.time_played_seconds),
        record.play_count
    )
}

pub fn note_content(record: &GameTimeRecord, at: DateTime<Local>) -> String {
    format!(
        "\n 📅 Last played: {}\n ⏱️ Recorded time: {}\n 🔁 Times played: {}\n",
        format_local_minutes(at),
        format_hms(record.time_played_seconds),
        record.play_count
    )
}

/// Rewrites the first note of `path` with the summary for `game`, creating
/// the document when it does not exist yet.
pub fn update_note(
    path: &Path,
    game: &str,
    record: &GameTimeRecord,
    at: DateTime<Local>,
) -> Result<()> {
    let mut doc = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read note {}", path.display()))?;
        if raw.trim().is_empty() {
            empty_document()
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in note {}", path.display()))?
        }
    } else {
        empty_document()
    };

    apply_summary(&mut doc, game, record, at)
        .with_context(|| format!("unexpected note layout in {}", path.display()))?;

    let payload = serde_json::to_string_pretty(&doc)?;
    write_atomic(path, payload.as_bytes())
}

fn empty_document() -> Value {
    json!({ "notes": [] })
}

fn apply_summary(
    doc: &mut Value,
    game: &str,
    record: &GameTimeRecord,
    at: DateTime<Local>,
) -> Result<()> {
    let Some(root) = doc.as_object_mut() else {
        bail!("note document is not a JSON object");
    };
    let notes = root
        .entry("notes")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(notes) = notes.as_array_mut() else {
        bail!("`notes` is not an array");
    };

    let timestamp = at.timestamp();
    if notes.is_empty() {
        notes.push(json!({
            "id": format!("{:08x}", timestamp),
            "shortcut_name": game,
            "ordinal": 0,
            "time_created": timestamp,
        }));
    }
    let Some(first) = notes.first_mut().and_then(Value::as_object_mut) else {
        bail!("first note is not a JSON object");
    };
    first.insert("title".to_string(), Value::from(note_title(record, at)));
    first.insert("content".to_string(), Value::from(note_content(record, at)));
    first.insert("time_modified".to_string(), Value::from(timestamp));
    Ok(())
}
