use std::io::{Write, stdout};
use std::time::Duration;

use crossterm::style::{Color, Stylize};

use crate::installer::{Action, InstallReport, Outcome, RecordChange};
use crate::store::GameTimeRecord;
use crate::tracker::TrackerEvent;
use crate::util::{format_hms, truncate};

const RULE_WIDTH: usize = 56;
const MAX_NAME_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Ok,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Self::Info => "[INFO]",
            Self::Ok => "[OK]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        }
    }

    fn color(self) -> Color {
        match self {
            Self::Info => Color::Cyan,
            Self::Ok => Color::Green,
            Self::Warn => Color::Yellow,
            Self::Error => Color::Red,
        }
    }
}

pub fn banner(title: &str) {
    println!("{}", hr(title, RULE_WIDTH).with(Color::Magenta).bold());
}

pub fn line(level: Level, message: &str) {
    println!("{} {message}", level.tag().with(level.color()).bold());
}

pub fn info(message: &str) {
    line(Level::Info, message);
}

pub fn ok(message: &str) {
    line(Level::Ok, message);
}

pub fn warn(message: &str) {
    line(Level::Warn, message);
}

pub fn error(message: &str) {
    line(Level::Error, message);
}

pub fn kv(label: &str, value: &str) {
    println!("{}", kv_line(label, value));
}

/// Redraws the single live timer line of a one-shot run.
pub fn print_timer(game: &str, elapsed: Duration) {
    let mut out = stdout();
    let _ = write!(
        out,
        "\r{} {}  {}",
        "▶".with(Color::Green).bold(),
        truncate(game, MAX_NAME_WIDTH),
        format_hms(elapsed.as_secs_f64()).bold()
    );
    let _ = out.flush();
}

pub fn finish_timer() {
    println!();
}

pub fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::ShortcutsReloaded { games } => {
            info(&format!("Watching {games} shortcut executable(s)."));
        }
        TrackerEvent::ShortcutsRejected { error } => {
            warn(&format!(
                "Shortcut list unreadable, keeping the previous one: {error}"
            ));
        }
        TrackerEvent::SessionStarted { pid, game, prior } => {
            ok(&format!(
                "{game} started (pid {pid}); {} over {} session(s) so far.",
                format_hms(prior.time_played_seconds),
                prior.play_count
            ));
        }
        TrackerEvent::SessionEnded {
            game,
            session_seconds,
            record,
            ..
        } => match record {
            Some(record) => ok(&format!(
                "{game} closed after {}; total {} over {} session(s).",
                format_hms(*session_seconds),
                format_hms(record.time_played_seconds),
                record.play_count
            )),
            None => error(&format!(
                "{game} closed after {} ({session_seconds:.0}s) but the session could not be saved.",
                format_hms(*session_seconds)
            )),
        },
    }
}

pub fn print_install_report(report: &InstallReport) {
    banner(&format!("nsgtt {}", report.action.label()));
    kv("shortcuts", &report.shortcuts_path.display().to_string());

    if !report.file_found {
        warn("No shortcut list found; nothing to do.");
        return;
    }
    if report.backup_created {
        ok(&format!("Backup written to {}", report.backup_path.display()));
    } else {
        info(&format!(
            "Keeping existing backup {}",
            report.backup_path.display()
        ));
    }

    for change in &report.changes {
        if let Some((level, message)) = describe_change(report.action, change) {
            line(level, &message);
        }
    }

    let rewritten = report.rewritten();
    if report.written {
        ok(&format!("{rewritten} shortcut(s) updated. Restart Steam to apply."));
    } else {
        info("No shortcut needed changes.");
    }
}

fn describe_change(action: Action, change: &RecordChange) -> Option<(Level, String)> {
    let name = if change.app_name.is_empty() {
        format!("#{}", change.index)
    } else {
        change.app_name.clone()
    };
    match (&change.outcome, action) {
        (Outcome::Rewritten, Action::Install) => Some((Level::Ok, format!("{name}: wrapped"))),
        (Outcome::Rewritten, Action::Uninstall) => Some((Level::Ok, format!("{name}: restored"))),
        (Outcome::AlreadyWrapped, _) => Some((Level::Info, format!("{name}: already wrapped"))),
        (Outcome::NotWrapped, _) => None,
        (Outcome::MissingExecutable(path), _) => Some((
            Level::Warn,
            format!("{name}: executable not found ({path}); left unchanged"),
        )),
        (Outcome::Unrecognized, _) => Some((
            Level::Warn,
            format!("{name}: launch command not recognised; left unchanged"),
        )),
    }
}

pub fn print_stats_table(rows: &[(String, GameTimeRecord)]) {
    if rows.is_empty() {
        info("No play time recorded yet.");
        return;
    }
    let lines = render_stats_table(rows);
    let last = lines.len() - 1;
    for (index, text) in lines.iter().enumerate() {
        if index == 0 || index == last {
            println!("{}", text.as_str().bold());
        } else {
            println!("{text}");
        }
    }
}

/// Plain text table sorted by play time, longest first, with a total row.
pub fn render_stats_table(rows: &[(String, GameTimeRecord)]) -> Vec<String> {
    let mut sorted: Vec<&(String, GameTimeRecord)> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        b.1.time_played_seconds
            .total_cmp(&a.1.time_played_seconds)
            .then_with(|| a.0.cmp(&b.0))
    });

    let name_width = sorted
        .iter()
        .map(|(name, _)| name.chars().count().min(MAX_NAME_WIDTH))
        .max()
        .unwrap_or(0)
        .max("Game".len())
        .max("Total".len());

    let row = |name: &str, time: &str, count: &str| {
        format!(
            "{:<name_width$}  {:>10}  {:>6}",
            truncate(name, MAX_NAME_WIDTH),
            time,
            count
        )
    };

    let mut lines = Vec::with_capacity(sorted.len() + 3);
    lines.push(row("Game", "Time", "Plays"));
    lines.push("-".repeat(name_width + 20));
    for (name, record) in &sorted {
        lines.push(row(
            name,
            &format_hms(record.time_played_seconds),
            &record.play_count.to_string(),
        ));
    }

    let total_seconds: f64 = sorted.iter().map(|(_, r)| r.time_played_seconds).sum();
    let total_plays: u64 = sorted.iter().map(|(_, r)| u64::from(r.play_count)).sum();
    lines.push(row(
        "Total",
        &format_hms(total_seconds),
        &total_plays.to_string(),
    ));
    lines
}

fn kv_line(label: &str, value: &str) -> String {
    format!("{label:<11}: {value}")
}

fn hr(title: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    let core = format!(" {title} ");
    if core.len() >= width {
        return truncate(title, width);
    }

    let side = (width - core.len()) / 2;
    let right = width - core.len() - side;
    format!("{}{}{}", "-".repeat(side), core, "-".repeat(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seconds: f64, count: u32) -> GameTimeRecord {
        GameTimeRecord {
            time_played_seconds: seconds,
            play_count: count,
        }
    }

    #[test]
    fn header_rule_respects_requested_width() {
        assert_eq!(hr("nsgtt doctor", 40).len(), 40);
    }

    #[test]
    fn stats_table_sorts_by_time_and_totals() {
        let lines = render_stats_table(&[
            ("Celeste".to_string(), record(600.0, 2)),
            ("Hollow Knight".to_string(), record(7_200.0, 5)),
            ("Doom".to_string(), record(60.0, 1)),
        ]);

        assert!(lines[0].starts_with("Game"));
        assert!(lines[2].starts_with("Hollow Knight"));
        assert!(lines[3].starts_with("Celeste"));
        assert!(lines[4].starts_with("Doom"));
        let total = lines.last().expect("total row");
        assert!(total.starts_with("Total"));
        assert!(total.contains("02:11:00"));
        assert!(total.trim_end().ends_with('8'));
    }

    #[test]
    fn long_names_are_clipped() {
        let long = "A".repeat(80);
        let lines = render_stats_table(&[(long, record(1.0, 1))]);
        assert!(lines[2].starts_with(&format!("{}...", "A".repeat(MAX_NAME_WIDTH - 3))));
    }

    #[test]
    fn not_wrapped_shortcuts_are_not_listed_on_uninstall() {
        let change = RecordChange {
            index: 3,
            app_name: String::new(),
            outcome: Outcome::NotWrapped,
        };
        assert_eq!(describe_change(Action::Uninstall, &change), None);

        let missing = RecordChange {
            outcome: Outcome::MissingExecutable("/gone".to_string()),
            ..change
        };
        let (level, message) = describe_change(Action::Install, &missing).expect("described");
        assert_eq!(level, Level::Warn);
        assert!(message.starts_with("#3:"));
    }
}
