//! Health probes backed by the operating system
//!
//! - port-open: TCP connect with the check timeout
//! - process-running: `pgrep -f` (unix) or `tasklist` (Windows)
//! - window-match: regex over visible window titles from `wmctrl -l`
//!   (Linux), System Events (macOS) or PowerShell (Windows)

use crate::runner;
use launchkit::{HealthMethod, HealthProbe};
use regex::Regex;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HealthProbe for SystemProbe {
    fn check(&self, method: &HealthMethod, timeout: Duration) -> bool {
        let healthy = match method {
            HealthMethod::PortOpen { host, port } => port_open(host, *port, timeout),
            HealthMethod::ProcessRunning { name } => process_running(name),
            HealthMethod::WindowMatch { pattern } => window_matches(pattern),
            HealthMethod::None => true,
        };
        log::debug!("Probe {} -> {healthy}", method.name());
        healthy
    }
}

fn port_open(host: &str, port: u16, timeout: Duration) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        log::debug!("Could not resolve {host}:{port}");
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

#[cfg(unix)]
fn process_running(name: &str) -> bool {
    runner::run_quiet("pgrep", &["-f", name])
}

#[cfg(windows)]
fn process_running(name: &str) -> bool {
    let image = if name.to_ascii_lowercase().ends_with(".exe") {
        name.to_string()
    } else {
        format!("{name}.exe")
    };
    runner::run_capture(
        "tasklist",
        &["/FI", &format!("IMAGENAME eq {image}"), "/FO", "CSV", "/NH"],
    )
    .is_ok_and(|out| tasklist_contains(&out, &image))
}

#[cfg_attr(not(windows), allow(dead_code))]
fn tasklist_contains(output: &str, image: &str) -> bool {
    output.lines().any(|line| {
        line.trim_start_matches('"')
            .split('"')
            .next()
            .is_some_and(|first| first.eq_ignore_ascii_case(image))
    })
}

fn window_matches(pattern: &str) -> bool {
    let Ok(regex) = Regex::new(pattern) else {
        log::warn!("Invalid window pattern: {pattern}");
        return false;
    };
    match window_titles() {
        Ok(titles) => titles.iter().any(|title| regex.is_match(title)),
        Err(e) => {
            log::debug!("Could not list windows: {e}");
            false
        }
    }
}

#[cfg(target_os = "windows")]
fn window_titles() -> anyhow::Result<Vec<String>> {
    let out = runner::run_capture(
        "powershell",
        &[
            "-NoProfile",
            "-Command",
            "Get-Process | Where-Object { $_.MainWindowTitle } | ForEach-Object { $_.MainWindowTitle }",
        ],
    )?;
    Ok(out.lines().map(str::to_string).collect())
}

#[cfg(target_os = "macos")]
fn window_titles() -> anyhow::Result<Vec<String>> {
    let out = runner::run_capture(
        "osascript",
        &[
            "-e",
            "tell application \"System Events\" to get name of every window of (every process whose visible is true)",
        ],
    )?;
    Ok(out.split(", ").map(str::to_string).collect())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn window_titles() -> anyhow::Result<Vec<String>> {
    let out = runner::run_capture("wmctrl", &["-l"])?;
    Ok(parse_wmctrl(&out))
}

/// `wmctrl -l` lines: window id, desktop, host, then the title
#[cfg_attr(any(target_os = "windows", target_os = "macos"), allow(dead_code))]
fn parse_wmctrl(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim_start();
            for _ in 0..3 {
                let (_, tail) = rest.split_once(char::is_whitespace)?;
                rest = tail.trim_start();
            }
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect()
}
