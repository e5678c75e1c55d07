//! Live process enumeration: `/proc` on Linux, WMI on Windows, `ps` elsewhere.

use std::path::PathBuf;
#[cfg(all(unix, not(target_os = "linux")))]
use std::process::{Command, Stdio};

#[cfg(not(target_os = "linux"))]
use anyhow::Context;
use anyhow::Result;
#[cfg(all(unix, not(target_os = "linux")))]
use anyhow::bail;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("process exited while being inspected")]
    Gone,
    #[error("{0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveProcess {
    pub pid: u32,
    pub exe: Result<PathBuf, ProbeError>,
}

impl LiveProcess {
    pub fn new(pid: u32, exe: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            exe: Ok(exe.into()),
        }
    }
}

/// Source of process table snapshots; the daemon uses [`SystemProcesses`].
pub trait ProcessSource {
    fn snapshot(&mut self) -> Result<Vec<LiveProcess>>;
}

#[derive(Default)]
pub struct SystemProcesses {
    #[cfg(windows)]
    wmi: Option<wmi::WMIConnection>,
}

impl ProcessSource for SystemProcesses {
    #[cfg(windows)]
    fn snapshot(&mut self) -> Result<Vec<LiveProcess>> {
        let processes = list_processes(&mut self.wmi);
        if processes.is_err() {
            // Reconnect on the next tick.
            self.wmi = None;
        }
        processes
    }

    #[cfg(not(windows))]
    fn snapshot(&mut self) -> Result<Vec<LiveProcess>> {
        list_processes()
    }
}

#[cfg(target_os = "linux")]
fn list_processes() -> Result<Vec<LiveProcess>> {
    use anyhow::Context;
    use std::fs;

    let mut processes = Vec::new();
    for entry in fs::read_dir("/proc").context("failed to list /proc")?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        processes.push(LiveProcess {
            pid,
            exe: linux_image_path(pid),
        });
    }
    Ok(processes)
}

#[cfg(target_os = "linux")]
fn linux_image_path(pid: u32) -> Result<PathBuf, ProbeError> {
    use std::fs;
    use std::io::ErrorKind;

    let exe = fs::read_link(format!("/proc/{pid}/exe")).map_err(|err| match err.kind() {
        ErrorKind::PermissionDenied => ProbeError::PermissionDenied,
        ErrorKind::NotFound => ProbeError::Gone,
        _ => ProbeError::Unreadable(err.to_string()),
    })?;

    if !is_wine_loader(&exe) {
        return Ok(exe);
    }
    // Games under Wine/Proton show the loader as their image; the Windows
    // path the game was started with is argv[0].
    let cmdline = fs::read(format!("/proc/{pid}/cmdline")).map_err(|_| ProbeError::Gone)?;
    let argv0 = cmdline.split(|byte| *byte == 0).next().unwrap_or_default();
    if argv0.is_empty() {
        return Ok(exe);
    }
    Ok(PathBuf::from(wine_to_unix(&String::from_utf8_lossy(argv0))))
}

/// Maps Wine's `Z:` drive, which is the host root, back to a Unix path.
/// Paths on other drives are returned unchanged.
#[cfg(any(target_os = "linux", test))]
fn wine_to_unix(path: &str) -> String {
    let Some(rest) = path
        .strip_prefix("Z:")
        .or_else(|| path.strip_prefix("z:"))
        .filter(|rest| rest.starts_with(['\\', '/']))
    else {
        return path.to_string();
    };
    rest.replace('\\', "/")
}

#[cfg(target_os = "linux")]
fn is_wine_loader(exe: &std::path::Path) -> bool {
    exe.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("wine") && name.contains("preloader"))
}

#[cfg(windows)]
fn list_processes(slot: &mut Option<wmi::WMIConnection>) -> Result<Vec<LiveProcess>> {
    use serde::Deserialize;
    use wmi::{COMLibrary, WMIConnection};

    #[allow(non_camel_case_types, non_snake_case)]
    #[derive(Deserialize)]
    struct Win32_Process {
        ProcessId: u32,
        ExecutablePath: Option<String>,
    }

    if slot.is_none() {
        let com_con = COMLibrary::new().context("failed to initialise COM")?;
        let wmi_con = WMIConnection::new(com_con.into()).context("failed to connect to WMI")?;
        *slot = Some(wmi_con);
    }
    let wmi_con = slot.as_ref().context("WMI connection unavailable")?;
    let rows: Vec<Win32_Process> = wmi_con.query().context("Win32_Process query failed")?;
    Ok(rows
        .into_iter()
        .map(|row| LiveProcess {
            pid: row.ProcessId,
            exe: reported_image(row.ExecutablePath),
        })
        .collect())
}

/// WMI leaves the path empty for processes owned by other users.
#[cfg(any(windows, test))]
fn reported_image(path: Option<String>) -> Result<PathBuf, ProbeError> {
    path.filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(ProbeError::PermissionDenied)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn list_processes() -> Result<Vec<LiveProcess>> {
    let output = Command::new("ps")
        .args(["-axo", "pid=,comm="])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .context("failed to run ps")?;
    if !output.status.success() {
        bail!("ps exited with {}", output.status);
    }
    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(any(all(unix, not(target_os = "linux")), test))]
fn parse_ps_output(raw: &str) -> Vec<LiveProcess> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let split = line.find(char::is_whitespace)?;
            let pid = line[..split].parse::<u32>().ok()?;
            let command = line[split..].trim();
            let exe = if command.starts_with('/') {
                Ok(PathBuf::from(command))
            } else {
                Err(ProbeError::Unreadable(format!(
                    "no absolute image path: {command}"
                )))
            };
            Some(LiveProcess { pid, exe })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_path_means_access_denied() {
        assert_eq!(reported_image(None), Err(ProbeError::PermissionDenied));
        assert_eq!(
            reported_image(Some("  ".to_string())),
            Err(ProbeError::PermissionDenied)
        );
        assert_eq!(
            reported_image(Some("C:\\Games\\Celeste\\Celeste.exe".to_string())),
            Ok(PathBuf::from("C:\\Games\\Celeste\\Celeste.exe"))
        );
    }

    #[test]
    fn wine_host_drive_maps_back_to_unix_paths() {
        assert_eq!(
            wine_to_unix("Z:\\home\\deck\\Games\\Celeste\\Celeste.exe"),
            "/home/deck/Games/Celeste/Celeste.exe"
        );
        assert_eq!(wine_to_unix("z:/opt/game.exe"), "/opt/game.exe");
        assert_eq!(
            wine_to_unix("C:\\windows\\system32\\wineboot.exe"),
            "C:\\windows\\system32\\wineboot.exe"
        );
        assert_eq!(wine_to_unix("Zelda.exe"), "Zelda.exe");
    }

    #[test]
    fn ps_output_keeps_unreadable_rows() {
        let rows = parse_ps_output(
            "    1 /sbin/launchd\n  512 /Applications/Game.app/Contents/MacOS/Game\n  600 (kernel_task)\nnot-a-pid x\n",
        );
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], LiveProcess::new(1, "/sbin/launchd"));
        assert_eq!(rows[1].pid, 512);
        assert!(rows[2].exe.is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_is_listed_with_its_image() {
        let me = std::process::id();
        let processes = SystemProcesses::default().snapshot().expect("snapshot");
        let current = processes
            .iter()
            .find(|process| process.pid == me)
            .expect("own pid listed");
        assert_eq!(
            current.exe.as_ref().expect("own exe readable"),
            &std::env::current_exe().expect("current exe")
        );
    }
}
