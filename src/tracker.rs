//! Polling process tracker: one [`ProcessTracker::tick`] per poll interval.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};

use crate::notes;
use crate::process::ProcessSource;
use crate::rewriter::{normalize_path, target_executable};
use crate::shortcuts::ShortcutsFile;
use crate::store::{GameTimeRecord, PlaytimeStore};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Normalised executable path to display name, first shortcut wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcutTable {
    by_path: HashMap<String, String>,
}

impl ShortcutTable {
    pub fn from_file(file: &ShortcutsFile) -> Self {
        let mut by_path = HashMap::new();
        for record in &file.records {
            let Some(target) = target_executable(&record.exe) else {
                continue;
            };
            let name = if record.app_name.trim().is_empty() {
                crate::rewriter::file_stem(&target).to_string()
            } else {
                record.app_name.clone()
            };
            by_path.entry(normalize_path(&target)).or_insert(name);
        }
        Self { by_path }
    }

    pub fn lookup(&self, normalized_exe: &str) -> Option<&str> {
        self.by_path.get(normalized_exe).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedProcess {
    pub pid: u32,
    pub exe_path: String,
    pub game_name: String,
    pub started_at: DateTime<Utc>,
    pub note_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    ShortcutsReloaded {
        games: usize,
    },
    ShortcutsRejected {
        error: String,
    },
    SessionStarted {
        pid: u32,
        game: String,
        prior: GameTimeRecord,
    },
    /// `record` is `None` when the session could not be persisted.
    SessionEnded {
        pid: u32,
        game: String,
        session_seconds: f64,
        record: Option<GameTimeRecord>,
    },
}

pub struct ProcessTracker<P, C, S> {
    shortcuts_path: PathBuf,
    notes_dir: Option<PathBuf>,
    processes: P,
    clock: C,
    store: S,
    table: ShortcutTable,
    last_modified: Option<SystemTime>,
    tracked: HashMap<u32, TrackedProcess>,
    /// Pids already running at startup, with their image path.
    baseline: HashMap<u32, Option<String>>,
}

impl<P: ProcessSource, C: Clock, S: PlaytimeStore> ProcessTracker<P, C, S> {
    pub fn new(shortcuts_path: impl Into<PathBuf>, processes: P, clock: C, store: S) -> Self {
        Self {
            shortcuts_path: shortcuts_path.into(),
            notes_dir: None,
            processes,
            clock,
            store,
            table: ShortcutTable::default(),
            last_modified: None,
            tracked: HashMap::new(),
            baseline: HashMap::new(),
        }
    }

    pub fn with_notes_dir(mut self, notes_dir: Option<PathBuf>) -> Self {
        self.notes_dir = notes_dir;
        self
    }

    pub fn table(&self) -> &ShortcutTable {
        &self.table
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedProcess> {
        self.tracked.values()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records the processes that are already running so they are never
    /// counted: the OS gives no reliable start time for them.
    pub fn prime(&mut self) -> Result<usize> {
        let live = self
            .processes
            .snapshot()
            .context("failed to take baseline process snapshot")?;
        self.baseline = live
            .into_iter()
            .map(|process| {
                let path = process
                    .exe
                    .ok()
                    .map(|exe| normalize_path(&exe.to_string_lossy()));
                (process.pid, path)
            })
            .collect();
        Ok(self.baseline.len())
    }

    pub fn tick(&mut self) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        self.reload_if_changed(&mut events);

        let live = match self.processes.snapshot() {
            Ok(live) => live,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "process enumeration failed; retrying next tick");
                return events;
            }
        };
        let now = self.clock.now();

        let mut present: HashSet<u32> = HashSet::with_capacity(live.len());
        let mut paths: Vec<(u32, String)> = Vec::with_capacity(live.len());
        for process in live {
            present.insert(process.pid);
            match process.exe {
                Ok(exe) => paths.push((process.pid, normalize_path(&exe.to_string_lossy()))),
                Err(err) => debug!(pid = process.pid, error = %err, "skipping unreadable process"),
            }
        }
        paths.sort_by_key(|(pid, _)| *pid);
        let path_of: HashMap<u32, &str> = paths
            .iter()
            .map(|(pid, path)| (*pid, path.as_str()))
            .collect();

        // A pid that vanished, or now runs a different image, has been
        // recycled by the OS; its old owner is finished.
        let mut finished: Vec<u32> = self
            .tracked
            .values()
            .filter(|tracked| {
                !present.contains(&tracked.pid)
                    || path_of
                        .get(&tracked.pid)
                        .is_some_and(|path| *path != tracked.exe_path)
            })
            .map(|tracked| tracked.pid)
            .collect();
        finished.sort_unstable();
        for pid in finished {
            if let Some(tracked) = self.tracked.remove(&pid) {
                events.push(self.finish_session(tracked, now));
            }
        }

        self.baseline.retain(|pid, known| {
            present.contains(pid)
                && match (known.as_deref(), path_of.get(pid)) {
                    (Some(known), Some(current)) => known == *current,
                    _ => true,
                }
        });

        for (pid, path) in &paths {
            if self.tracked.contains_key(pid) || self.baseline.contains_key(pid) {
                continue;
            }
            let Some(game) = self.table.lookup(path).map(str::to_string) else {
                continue;
            };
            events.push(self.start_session(*pid, path.clone(), game, now));
        }

        events
    }

    fn reload_if_changed(&mut self, events: &mut Vec<TrackerEvent>) {
        let modified = match fs::metadata(&self.shortcuts_path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!(path = %self.shortcuts_path.display(), error = %err, "cannot stat shortcut list");
                }
                return;
            }
        };
        // Any change counts: a list restored from a backup can carry an
        // older timestamp.
        if self.last_modified == Some(modified) {
            return;
        }

        match load_table(&self.shortcuts_path) {
            Ok(table) => {
                info!(
                    path = %self.shortcuts_path.display(),
                    games = table.len(),
                    "loaded shortcut list"
                );
                events.push(TrackerEvent::ShortcutsReloaded { games: table.len() });
                self.table = table;
                self.last_modified = Some(modified);
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(
                    path = %self.shortcuts_path.display(),
                    error = %error,
                    kept_games = self.table.len(),
                    "shortcut list unreadable; keeping previous table"
                );
                events.push(TrackerEvent::ShortcutsRejected { error });
            }
        }
    }

    fn start_session(
        &mut self,
        pid: u32,
        exe_path: String,
        game: String,
        now: DateTime<Utc>,
    ) -> TrackerEvent {
        let prior = self.store.get(&game).unwrap_or_else(|err| {
            warn!(game = %game, error = %format!("{err:#}"), "failed to read stored play time");
            GameTimeRecord::default()
        });
        let note_path = self
            .notes_dir
            .as_deref()
            .map(|dir| notes::shortcut_note_path(dir, &game));
        info!(pid, game = %game, exe = %exe_path, "session started");

        self.tracked.insert(
            pid,
            TrackedProcess {
                pid,
                exe_path,
                game_name: game.clone(),
                started_at: now,
                note_path,
            },
        );
        TrackerEvent::SessionStarted { pid, game, prior }
    }

    fn finish_session(&mut self, tracked: TrackedProcess, now: DateTime<Utc>) -> TrackerEvent {
        let session_seconds =
            ((now - tracked.started_at).num_milliseconds() as f64 / 1000.0).max(0.0);

        let record = match self.store.record_session(&tracked.game_name, session_seconds) {
            Ok(record) => {
                info!(
                    pid = tracked.pid,
                    game = %tracked.game_name,
                    session_seconds,
                    total_seconds = record.time_played_seconds,
                    play_count = record.play_count,
                    "session saved"
                );
                if let Some(note_path) = &tracked.note_path {
                    write_note(note_path, &tracked.game_name, &record);
                }
                Some(record)
            }
            Err(err) => {
                warn!(
                    game = %tracked.game_name,
                    session_seconds,
                    started_at = %tracked.started_at,
                    error = %format!("{err:#}"),
                    "failed to persist session; add these seconds manually"
                );
                None
            }
        };

        TrackerEvent::SessionEnded {
            pid: tracked.pid,
            game: tracked.game_name,
            session_seconds,
            record,
        }
    }
}

fn load_table(path: &Path) -> Result<ShortcutTable> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file = ShortcutsFile::decode(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(ShortcutTable::from_file(&file))
}

fn write_note(path: &Path, game: &str, record: &GameTimeRecord) {
    if path.parent().is_some_and(|parent| !parent.is_dir()) {
        debug!(path = %path.display(), "notes folder missing; skipping note");
        return;
    }
    if let Err(err) = notes::update_note(path, game, record, Local::now()) {
        warn!(game = %game, path = %path.display(), error = %format!("{err:#}"), "failed to update note");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{LiveProcess, ProbeError};
    use crate::shortcuts::test_support::shortcuts_blob;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::TempDir;

    const GAME: &str = "/opt/games/celeste/Celeste.bin";

    #[derive(Clone)]
    struct FakeClock(Rc<Cell<DateTime<Utc>>>);

    impl FakeClock {
        fn advance(&self, seconds: i64) {
            self.0.set(self.0.get() + TimeDelta::seconds(seconds));
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.get()
        }
    }

    #[derive(Clone, Default)]
    struct FakeProcesses {
        table: Rc<RefCell<Vec<LiveProcess>>>,
        fail: Rc<Cell<bool>>,
    }

    impl FakeProcesses {
        fn set(&self, processes: Vec<LiveProcess>) {
            *self.table.borrow_mut() = processes;
        }
    }

    impl ProcessSource for FakeProcesses {
        fn snapshot(&mut self) -> Result<Vec<LiveProcess>> {
            if self.fail.get() {
                anyhow::bail!("enumeration denied");
            }
            Ok(self.table.borrow().clone())
        }
    }

    struct Harness {
        _tmp: TempDir,
        shortcuts: PathBuf,
        clock: FakeClock,
        processes: FakeProcesses,
        tracker: ProcessTracker<FakeProcesses, FakeClock, MemoryStore>,
    }

    fn harness(records: &[(&str, &str, &str)]) -> Harness {
        let tmp = TempDir::new().expect("temp dir");
        let shortcuts = tmp.path().join("shortcuts.vdf");
        fs::write(&shortcuts, shortcuts_blob(records)).expect("write shortcuts");

        let start = DateTime::parse_from_rfc3339("2026-01-10T18:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let clock = FakeClock(Rc::new(Cell::new(start)));
        let processes = FakeProcesses::default();
        let tracker = ProcessTracker::new(
            &shortcuts,
            processes.clone(),
            clock.clone(),
            MemoryStore::default(),
        );
        Harness {
            _tmp: tmp,
            shortcuts,
            clock,
            processes,
            tracker,
        }
    }

    fn ended(events: &[TrackerEvent]) -> Vec<(&str, f64)> {
        events
            .iter()
            .filter_map(|event| match event {
                TrackerEvent::SessionEnded {
                    game,
                    session_seconds,
                    ..
                } => Some((game.as_str(), *session_seconds)),
                _ => None,
            })
            .collect()
    }

    fn started(events: &[TrackerEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, TrackerEvent::SessionStarted { .. }))
            .count()
    }

    fn set_mtime(path: &Path, at: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .expect("open")
            .set_modified(at)
            .expect("set mtime");
    }

    #[test]
    fn one_process_lifetime_yields_one_session() {
        let wrapped = format!("\"/usr/bin/nsgtt\" --run \"{GAME}\"");
        let mut h = harness(&[("Game", wrapped.as_str(), "/opt/games/celeste")]);

        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        let first = h.tracker.tick();
        assert!(first.contains(&TrackerEvent::ShortcutsReloaded { games: 1 }));
        assert_eq!(started(&first), 1);

        h.clock.advance(90);
        h.processes.set(vec![]);
        let second = h.tracker.tick();
        assert_eq!(ended(&second), vec![("Game", 90.0)]);

        let record = h.tracker.store().games["Game"];
        assert_eq!(record.play_count, 1);
        assert_eq!(record.time_played_seconds, 90.0);
        assert_eq!(h.tracker.tracked().count(), 0);

        h.clock.advance(5);
        assert!(ended(&h.tracker.tick()).is_empty());
    }

    #[test]
    fn matches_unwrapped_shortcuts_case_insensitively() {
        let mut h = harness(&[("Hades", "\"/OPT/Games/Hades/Hades.bin\"", "/opt")]);
        h.processes
            .set(vec![LiveProcess::new(7, "/opt/games/hades/./Hades.bin")]);
        assert_eq!(started(&h.tracker.tick()), 1);
    }

    #[test]
    fn duplicate_shortcuts_track_a_pid_once() {
        let wrapped = format!("nsgtt --run \"{GAME}\"");
        let mut h = harness(&[("First", GAME, "/opt"), ("Second", wrapped.as_str(), "/opt")]);
        h.processes.set(vec![LiveProcess::new(100, GAME)]);

        let events = h.tracker.tick();
        assert_eq!(started(&events), 1);
        assert_eq!(h.tracker.tracked().count(), 1);
        assert_eq!(
            h.tracker.tracked().next().map(|t| t.game_name.as_str()),
            Some("First")
        );

        h.clock.advance(10);
        h.tracker.tick();
        h.processes.set(vec![]);
        h.tracker.tick();
        assert_eq!(h.tracker.store().games.len(), 1);
        assert_eq!(h.tracker.store().games["First"].play_count, 1);
    }

    #[test]
    fn games_running_at_startup_are_ignored() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        assert_eq!(h.tracker.prime().expect("prime"), 1);

        assert_eq!(started(&h.tracker.tick()), 0);
        h.processes.set(vec![]);
        assert!(ended(&h.tracker.tick()).is_empty());

        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        assert_eq!(started(&h.tracker.tick()), 1);
    }

    #[test]
    fn recycled_pid_closes_the_old_session() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        h.tracker.tick();

        h.clock.advance(30);
        h.processes.set(vec![LiveProcess::new(100, "/usr/bin/bash")]);
        let events = h.tracker.tick();
        assert_eq!(ended(&events), vec![("Game", 30.0)]);
        assert_eq!(started(&events), 0);
    }

    #[test]
    fn unreadable_process_is_skipped_but_still_alive() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        h.tracker.tick();

        h.processes.set(vec![
            LiveProcess {
                pid: 100,
                exe: Err(ProbeError::PermissionDenied),
            },
            LiveProcess {
                pid: 200,
                exe: Err(ProbeError::Gone),
            },
        ]);
        let events = h.tracker.tick();
        assert!(ended(&events).is_empty());
        assert_eq!(h.tracker.tracked().count(), 1);
    }

    #[test]
    fn failed_enumeration_keeps_sessions_open() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        h.tracker.tick();

        h.processes.fail.set(true);
        assert!(ended(&h.tracker.tick()).is_empty());
        assert_eq!(h.tracker.tracked().count(), 1);
    }

    #[test]
    fn persistence_failure_does_not_block_other_sessions() {
        let other = "/opt/games/hades/Hades.bin";
        let mut h = harness(&[("Broken", GAME, "/opt"), ("Fine", other, "/opt")]);
        h.tracker.store.fail_for = Some("Broken".to_string());
        h.processes
            .set(vec![LiveProcess::new(100, GAME), LiveProcess::new(101, other)]);
        h.tracker.tick();

        h.clock.advance(42);
        h.processes.set(vec![]);
        let events = h.tracker.tick();

        assert_eq!(ended(&events), vec![("Broken", 42.0), ("Fine", 42.0)]);
        assert!(events.iter().any(|event| matches!(
            event,
            TrackerEvent::SessionEnded { game, record: None, .. } if game == "Broken"
        )));
        assert_eq!(h.tracker.store().games["Fine"].play_count, 1);
        assert!(!h.tracker.store().games.contains_key("Broken"));
    }

    #[test]
    fn malformed_reload_keeps_previous_table() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.tracker.tick();
        assert_eq!(h.tracker.table().len(), 1);

        let mut truncated = shortcuts_blob(&[("Other", "/x/other", "/x")]);
        truncated.truncate(truncated.len() - 2);
        fs::write(&h.shortcuts, truncated).expect("write truncated");
        set_mtime(&h.shortcuts, SystemTime::now() + Duration::from_secs(60));

        let events = h.tracker.tick();
        assert!(
            events
                .iter()
                .any(|event| matches!(event, TrackerEvent::ShortcutsRejected { .. }))
        );
        assert_eq!(h.tracker.table().lookup(&normalize_path(GAME)), Some("Game"));

        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        assert_eq!(started(&h.tracker.tick()), 1);
    }

    #[test]
    fn newer_shortcut_list_is_picked_up() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.tracker.tick();

        fs::write(
            &h.shortcuts,
            shortcuts_blob(&[("Game", GAME, "/opt"), ("Other", "/x/other", "/x")]),
        )
        .expect("rewrite");
        set_mtime(&h.shortcuts, SystemTime::now() + Duration::from_secs(60));

        let events = h.tracker.tick();
        assert!(events.contains(&TrackerEvent::ShortcutsReloaded { games: 2 }));
        assert!(h.tracker.tick().is_empty());
    }

    #[test]
    fn restored_list_with_older_mtime_is_picked_up() {
        let mut h = harness(&[("Game", GAME, "/opt")]);
        set_mtime(&h.shortcuts, SystemTime::now());
        h.tracker.tick();

        fs::write(
            &h.shortcuts,
            shortcuts_blob(&[("Game", GAME, "/opt"), ("Other", "/x/other", "/x")]),
        )
        .expect("rewrite");
        set_mtime(&h.shortcuts, SystemTime::now() - Duration::from_secs(3_600));

        let events = h.tracker.tick();
        assert!(events.contains(&TrackerEvent::ShortcutsReloaded { games: 2 }));
        assert!(h.tracker.tick().is_empty());
    }

    #[test]
    fn finished_session_updates_note_when_folder_exists() {
        let notes_dir = TempDir::new().expect("notes dir");
        let mut h = harness(&[("Game", GAME, "/opt")]);
        h.tracker.notes_dir = Some(notes_dir.path().to_path_buf());

        h.processes.set(vec![LiveProcess::new(100, GAME)]);
        h.tracker.tick();
        h.clock.advance(61);
        h.processes.set(vec![]);
        h.tracker.tick();

        let note = fs::read_to_string(notes_dir.path().join("notes_shortcut_Game"))
            .expect("note written");
        assert!(note.contains("00:01:01"));
    }
}
