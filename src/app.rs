use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};

use crate::cli::RunRequest;
use crate::config::{self, RuntimeSettings, TrackerConfig};
use crate::installer::{self, InstallReport};
use crate::notes;
use crate::process::SystemProcesses;
use crate::process_guard::{self, AcquireState, RunningState};
use crate::rewriter::{file_stem, is_wrapped};
use crate::shortcuts::ShortcutsFile;
use crate::steam;
use crate::store::{GameTimeRecord, JsonStore, PlaytimeStore};
use crate::tracker::{ProcessTracker, SystemClock};
use crate::ui;
use crate::util::{format_hms, human_duration};

const RUN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Launches one game, waits for it and records the session.
pub fn run_game(request: RunRequest, runtime: &RuntimeSettings) -> Result<u8> {
    let exe = launch_path(&request.exe)?;
    let game = session_name(&exe, request.name.as_deref());

    if let RunningState::Running { pid } = process_guard::inspect_running_instance(&runtime.home)?
    {
        ui::warn(&format!(
            "The nsgtt daemon is running{}; if {game} is one of its shortcuts this session may be counted twice.",
            pid.map(|pid| format!(" (PID {pid})")).unwrap_or_default()
        ));
    }

    let mut store = JsonStore::new(&runtime.database_path);
    let prior = store.get(&game).unwrap_or_else(|err| {
        warn!(game = %game, error = %format!("{err:#}"), "failed to read stored play time");
        GameTimeRecord::default()
    });

    ui::banner(&format!("nsgtt run: {game}"));
    ui::kv("executable", &exe.display().to_string());
    ui::kv(
        "played",
        &format!(
            "{} over {} session(s)",
            format_hms(prior.time_played_seconds),
            prior.play_count
        ),
    );

    let stop = install_stop_signal()?;
    let mut child = spawn_game(&exe, &request.args)?;
    let started_at = Utc::now();
    let started = Instant::now();
    info!(game = %game, pid = child.id(), "game launched");

    loop {
        if stop.load(Ordering::Relaxed) {
            ui::finish_timer();
            ui::info("Interrupted; ending the session now.");
            break;
        }
        if let Some(status) = child
            .try_wait()
            .context("failed to query game process status")?
        {
            ui::finish_timer();
            info!(game = %game, %status, "game exited");
            break;
        }
        ui::print_timer(&game, started.elapsed());
        thread::sleep(RUN_POLL_INTERVAL);
    }

    let session_seconds = ((Utc::now() - started_at).num_milliseconds() as f64 / 1000.0).max(0.0);
    Ok(record_run(
        &mut store,
        &game,
        session_seconds,
        started_at,
        request.note.as_deref(),
        Local::now(),
    ))
}

/// Stores a finished one-shot session and refreshes its note. Returns the
/// process exit code.
fn record_run(
    store: &mut impl PlaytimeStore,
    game: &str,
    session_seconds: f64,
    started_at: DateTime<Utc>,
    note: Option<&Path>,
    at: DateTime<Local>,
) -> u8 {
    let record = match store.record_session(game, session_seconds) {
        Ok(record) => record,
        Err(err) => {
            warn!(
                game = %game,
                session_seconds,
                started_at = %started_at,
                error = %format!("{err:#}"),
                "failed to persist session; add these seconds manually"
            );
            ui::error(&format!(
                "Session of {} ({session_seconds:.0}s) for {game} could not be saved: {err:#}",
                format_hms(session_seconds)
            ));
            return 1;
        }
    };

    ui::ok(&format!(
        "Session {}; {game} total {} over {} session(s).",
        format_hms(session_seconds),
        format_hms(record.time_played_seconds),
        record.play_count
    ));

    if let Some(note) = note {
        match notes::update_note(note, game, &record, at) {
            Ok(()) => ui::ok(&format!("Note updated: {}", note.display())),
            Err(err) => {
                warn!(path = %note.display(), error = %format!("{err:#}"), "failed to update note");
                ui::warn(&format!("Could not update note {}: {err:#}", note.display()));
            }
        }
    }
    0
}

pub fn install_shortcuts(config: &TrackerConfig) -> Result<u8> {
    let account = steam::discover(config)?;
    let tool = env::current_exe().context("failed to resolve current executable path")?;
    let report = installer::install(&account.shortcuts_path(), &tool)?;
    finish_shortcut_action(&report)
}

pub fn uninstall_shortcuts(config: &TrackerConfig) -> Result<u8> {
    let account = steam::discover(config)?;
    let report = installer::uninstall(&account.shortcuts_path())?;
    finish_shortcut_action(&report)
}

fn finish_shortcut_action(report: &InstallReport) -> Result<u8> {
    ui::print_install_report(report);
    Ok(0)
}

pub fn show_stats(runtime: &RuntimeSettings) -> Result<u8> {
    let store = JsonStore::new(&runtime.database_path);
    let rows = store.all()?;
    ui::banner("nsgtt play time");
    ui::kv("database", &runtime.database_path.display().to_string());
    ui::print_stats_table(&rows);
    Ok(0)
}

pub fn doctor(config: &TrackerConfig, runtime: &RuntimeSettings) -> Result<u8> {
    let mut issues = 0u8;

    ui::banner("nsgtt doctor");
    ui::kv("config", &config::config_path(&runtime.home).display().to_string());
    ui::kv("database", &runtime.database_path.display().to_string());
    ui::kv("poll", &human_duration(runtime.poll_interval));

    match steam::discover(config) {
        Ok(account) => {
            ui::ok(&format!("Steam root: {}", account.root.display()));
            ui::ok(&format!(
                "Steam user {} at {}",
                account.user_id,
                account.user_dir.display()
            ));
            if !check_shortcuts(&account.shortcuts_path()) {
                issues += 1;
            }
            match steam::notes_dir(config, &account) {
                Some(dir) => ui::ok(&format!("Notes folder: {}", dir.display())),
                None => ui::info("Steam notes folder not found; daemon notes are disabled."),
            }
        }
        Err(err) => {
            issues += 1;
            ui::warn(&format!("{err:#}"));
            let tried = steam::steam_root_candidates(config);
            for path in tried {
                ui::kv("  tried", &path.display().to_string());
            }
        }
    }

    if runtime.database_path.exists() {
        match JsonStore::new(&runtime.database_path).all() {
            Ok(rows) => ui::ok(&format!("Database readable ({} game(s)).", rows.len())),
            Err(err) => {
                issues += 1;
                ui::warn(&format!("Database unreadable: {err:#}"));
            }
        }
    } else {
        ui::info("Database not created yet; it appears after the first session.");
    }

    match process_guard::inspect_running_instance(&runtime.home)? {
        RunningState::Running { pid: Some(pid) } => ui::info(&format!("Daemon running (PID {pid}).")),
        RunningState::Running { pid: None } => ui::info("Daemon running."),
        RunningState::NotRunning => ui::info("Daemon not running."),
    }

    if issues == 0 {
        ui::ok("Doctor: healthy");
        Ok(0)
    } else {
        ui::warn(&format!("Doctor: {issues} issue(s) found"));
        Ok(1)
    }
}

fn check_shortcuts(path: &Path) -> bool {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            ui::warn(&format!("Cannot read {}: {err}", path.display()));
            return false;
        }
    };
    match ShortcutsFile::decode(&raw) {
        Ok(file) => {
            let wrapped = file
                .records
                .iter()
                .filter(|record| is_wrapped(&record.exe))
                .count();
            ui::ok(&format!(
                "Shortcut list: {} shortcut(s), {wrapped} wrapped.",
                file.records.len()
            ));
            true
        }
        Err(err) => {
            ui::warn(&format!("Shortcut list {} is malformed: {err}", path.display()));
            false
        }
    }
}

/// Continuous monitor: polls the process table and records every shortcut
/// game session until Ctrl+C.
pub fn run_daemon(config: &TrackerConfig, runtime: &RuntimeSettings) -> Result<u8> {
    let _guard = match process_guard::acquire_single_instance(&runtime.home)? {
        AcquireState::Acquired(guard) => guard,
        AcquireState::AlreadyRunning { pid: Some(pid) } => {
            bail!("nsgtt daemon is already running (PID {pid})")
        }
        AcquireState::AlreadyRunning { pid: None } => bail!("nsgtt daemon is already running"),
    };

    let account = steam::discover(config)?;
    let shortcuts_path = account.shortcuts_path();
    let notes_dir = steam::notes_dir(config, &account);

    ui::banner("nsgtt daemon");
    ui::kv("steam user", &account.user_id);
    ui::kv("shortcuts", &shortcuts_path.display().to_string());
    ui::kv("database", &runtime.database_path.display().to_string());
    ui::kv(
        "notes",
        &notes_dir
            .as_deref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "disabled".to_string()),
    );
    ui::kv("poll", &human_duration(runtime.poll_interval));
    if !shortcuts_path.is_file() {
        ui::warn("Shortcut list does not exist yet; waiting for Steam to create it.");
    }

    let stop = install_stop_signal()?;
    let mut tracker = ProcessTracker::new(
        shortcuts_path,
        SystemProcesses::default(),
        SystemClock,
        JsonStore::new(&runtime.database_path),
    )
    .with_notes_dir(notes_dir);

    match tracker.prime() {
        Ok(count) => info!(processes = count, "baseline recorded; already running games are ignored"),
        Err(err) => warn!(error = %format!("{err:#}"), "baseline snapshot failed; every process counts as new"),
    }
    ui::info("Monitoring. Press Ctrl+C to stop.");

    while !stop.load(Ordering::Relaxed) {
        for event in tracker.tick() {
            ui::print_event(&event);
        }
        sleep_unless_stopped(runtime.poll_interval, &stop);
    }

    let open = tracker.tracked().count();
    if open > 0 {
        let games: Vec<&str> = tracker
            .tracked()
            .map(|tracked| tracked.game_name.as_str())
            .collect();
        warn!(sessions = open, games = ?games, "stopping with sessions in progress; they are not recorded");
        ui::warn(&format!(
            "Stopped while {} was running; that session is not recorded.",
            games.join(", ")
        ));
    }
    ui::info("Daemon stopped.");
    Ok(0)
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_CHECK_INTERVAL.min(deadline - now));
    }
}

fn session_name(exe: &Path, name: Option<&str>) -> String {
    if let Some(name) = name.map(str::trim)
        && !name.is_empty()
    {
        return name.to_string();
    }
    file_stem(&exe.to_string_lossy()).to_string()
}

/// Absolute path of the game, so it still resolves once the child runs from
/// the game's own folder.
fn launch_path(exe: &Path) -> Result<PathBuf> {
    if !exe.is_file() {
        bail!("game executable not found: {}", exe.display());
    }
    std::path::absolute(exe).with_context(|| format!("failed to resolve {}", exe.display()))
}

fn spawn_game(exe: &Path, args: &[String]) -> Result<Child> {
    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = game_dir(exe) {
        command.current_dir(dir);
    }
    command
        .spawn()
        .with_context(|| format!("failed to launch {}", exe.display()))
}

fn game_dir(exe: &Path) -> Option<PathBuf> {
    exe.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}
