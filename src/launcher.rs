//! Launching targets on the local machine
//!
//! Programs and browsers are spawned detached with their output discarded.
//! Folders open in the platform file manager. Network steps shell out to
//! `rasdial`, `nmcli` or the Cisco Secure Client CLI. `nmcli` and the Cisco
//! CLI read the password from stdin so it stays out of the process list;
//! `rasdial` has no such mode and takes it as an argument. Connectivity
//! checks start nothing and leave the work to their health check.

use crate::runner;
use launchkit::{
    CredentialHandle, CredentialProvider, LaunchDescriptor, LaunchError, LaunchHandle, Launcher,
    NetworkKind, Secret, WindowGeometry,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

#[cfg(target_os = "windows")]
const DEFAULT_CISCO_CLI: &str = r"C:\Program Files (x86)\Cisco\Cisco Secure Client\vpncli.exe";
#[cfg(not(target_os = "windows"))]
const DEFAULT_CISCO_CLI: &str = "/opt/cisco/secureclient/bin/vpn";

/// Launcher that spawns real processes
pub struct SystemLauncher {
    credentials: Arc<dyn CredentialProvider>,
    cisco_cli: PathBuf,
}

impl SystemLauncher {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            cisco_cli: PathBuf::from(DEFAULT_CISCO_CLI),
        }
    }

    pub fn with_cisco_cli(mut self, path: impl Into<PathBuf>) -> Self {
        self.cisco_cli = path.into();
        self
    }

    fn secret(&self, handle: Option<&CredentialHandle>) -> Result<Option<Secret>, LaunchError> {
        let Some(handle) = handle else {
            return Ok(None);
        };
        self.credentials
            .resolve(handle)
            .map(Some)
            .ok_or_else(|| LaunchError::MissingCredential(handle.service().to_string()))
    }

    fn connect(
        &self,
        connection: &str,
        kind: NetworkKind,
        host: Option<&str>,
        username: Option<&str>,
        credential: Option<&CredentialHandle>,
    ) -> Result<LaunchHandle, LaunchError> {
        let secret = self.secret(credential)?;
        match kind {
            NetworkKind::Windows => connect_rasdial(connection, username, secret.as_ref()),
            NetworkKind::NetworkManager => connect_nmcli(connection, secret.as_ref()),
            NetworkKind::Cisco => {
                let host = host.ok_or_else(|| {
                    LaunchError::Other(format!("cisco connection '{connection}' has no host"))
                })?;
                connect_cisco(&self.cisco_cli, host, username, secret.as_ref())
            }
        }
    }
}

impl Launcher for SystemLauncher {
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<LaunchHandle, LaunchError> {
        match descriptor {
            LaunchDescriptor::Program {
                path,
                args,
                working_dir,
            } => spawn_program(path, args, working_dir.as_deref()),
            LaunchDescriptor::Folder { path } => open_folder(path),
            LaunchDescriptor::Browser {
                browser,
                profile_dir,
                urls,
                window,
            } => launch_browser(browser, profile_dir.as_deref(), urls, *window),
            LaunchDescriptor::Network {
                connection,
                kind,
                host,
                username,
                credential,
            } => self.connect(
                connection,
                *kind,
                host.as_deref(),
                username.as_deref(),
                credential.as_ref(),
            ),
            LaunchDescriptor::Connectivity { url } => {
                log::info!("Checking connectivity to {url}");
                Ok(LaunchHandle::detached(format!("connectivity {url}")))
            }
        }
    }
}

// ============================================================================
// Processes and folders
// ============================================================================

/// A bare command name is looked up on PATH; anything else must exist.
fn check_executable(path: &Path) -> Result<(), LaunchError> {
    let bare = path.components().count() == 1 && !path.is_absolute();
    let found = if bare {
        path.exists() || runner::command_exists(&path.to_string_lossy())
    } else {
        path.exists()
    };
    if found {
        Ok(())
    } else {
        Err(LaunchError::NotFound(path.display().to_string()))
    }
}

fn spawn_program(
    path: &Path,
    args: &[String],
    working_dir: Option<&Path>,
) -> Result<LaunchHandle, LaunchError> {
    check_executable(path)?;
    if let Some(dir) = working_dir
        && !dir.is_dir()
    {
        return Err(LaunchError::NotFound(dir.display().to_string()));
    }

    let mut command = Command::new(path);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|e| LaunchError::Spawn {
        program: path.display().to_string(),
        message: e.to_string(),
    })?;
    log::debug!("Spawned {} (pid {})", path.display(), child.id());
    Ok(LaunchHandle::process(child.id()))
}

fn file_manager() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

fn open_folder(path: &Path) -> Result<LaunchHandle, LaunchError> {
    if !path.is_dir() {
        return Err(LaunchError::NotFound(path.display().to_string()));
    }
    let opener = file_manager();
    Command::new(opener)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| LaunchError::Spawn {
            program: opener.to_string(),
            message: e.to_string(),
        })?;
    Ok(LaunchHandle::detached(format!("opened {}", path.display())))
}

// ============================================================================
// Browsers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserFamily {
    Chromium,
    Firefox,
}

/// Executable candidates for a browser name; unknown names are used as a path
fn browser_candidates(browser: &str) -> (BrowserFamily, Vec<&str>) {
    let family = if browser.to_ascii_lowercase().contains("firefox") {
        BrowserFamily::Firefox
    } else {
        BrowserFamily::Chromium
    };

    let candidates = match browser {
        "chromium" => vec!["chromium", "chromium-browser", "google-chrome", "chrome"],
        "chrome" => vec![
            "google-chrome",
            "google-chrome-stable",
            "chrome",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ],
        "edge" => vec![
            "microsoft-edge",
            "msedge",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ],
        "brave" => vec!["brave-browser", "brave"],
        "firefox" => vec![
            "firefox",
            r"C:\Program Files\Mozilla Firefox\firefox.exe",
            "/Applications/Firefox.app/Contents/MacOS/firefox",
        ],
        other => vec![other],
    };
    (family, candidates)
}

fn browser_args(
    family: BrowserFamily,
    profile_dir: Option<&Path>,
    urls: &[String],
    window: WindowGeometry,
) -> Vec<String> {
    let mut args = Vec::new();
    match family {
        BrowserFamily::Chromium => {
            if let Some(dir) = profile_dir {
                args.push(format!("--user-data-dir={}", dir.display()));
            }
            if window.maximized {
                args.push("--start-maximized".to_string());
            } else {
                args.push(format!("--window-size={},{}", window.width, window.height));
            }
            args.push("--no-first-run".to_string());
            args.push("--new-window".to_string());
        }
        BrowserFamily::Firefox => {
            if let Some(dir) = profile_dir {
                args.push("-profile".to_string());
                args.push(dir.display().to_string());
            }
            if !window.maximized {
                args.extend([
                    "-width".to_string(),
                    window.width.to_string(),
                    "-height".to_string(),
                    window.height.to_string(),
                ]);
            }
            args.push("-new-window".to_string());
        }
    }
    args.extend(urls.iter().cloned());
    args
}

fn launch_browser(
    browser: &str,
    profile_dir: Option<&Path>,
    urls: &[String],
    window: WindowGeometry,
) -> Result<LaunchHandle, LaunchError> {
    let (family, candidates) = browser_candidates(browser);
    let executable = candidates
        .iter()
        .map(Path::new)
        .find(|candidate| check_executable(candidate).is_ok())
        .ok_or_else(|| LaunchError::NotFound(format!("browser '{browser}'")))?;

    if let Some(dir) = profile_dir {
        std::fs::create_dir_all(dir)?;
    }

    let args = browser_args(family, profile_dir, urls, window);
    spawn_program(executable, &args, None)
}

// ============================================================================
// Network connections
// ============================================================================

fn run_with_input(program: &Path, args: &[&str], input: &str) -> Result<Output, LaunchError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LaunchError::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    Ok(child.wait_with_output()?)
}

fn command_failed(what: &str, output: &Output) -> LaunchError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim().lines().last().unwrap_or_default().to_string()
    } else {
        stderr.trim().to_string()
    };
    LaunchError::CommandFailed {
        message: format!("{what}: {detail}"),
    }
}

fn rasdial_connected(output: &str, connection: &str) -> bool {
    let wanted = connection.to_lowercase();
    output.lines().any(|line| line.trim().to_lowercase() == wanted)
}

/// `rasdial` only accepts the password on its command line
fn rasdial_args<'a>(
    connection: &'a str,
    username: Option<&'a str>,
    secret: Option<&'a Secret>,
) -> Vec<&'a str> {
    let mut args = vec![connection];
    if let (Some(user), Some(secret)) = (username, secret) {
        args.push(user);
        args.push(secret.expose());
    }
    args
}

fn connect_rasdial(
    connection: &str,
    username: Option<&str>,
    secret: Option<&Secret>,
) -> Result<LaunchHandle, LaunchError> {
    if let Ok(active) = runner::run_capture("rasdial", &[])
        && rasdial_connected(&active, connection)
    {
        log::info!("VPN '{connection}' already connected");
        return Ok(LaunchHandle::detached("already connected"));
    }

    let output = Command::new("rasdial")
        .args(rasdial_args(connection, username, secret))
        .stdin(Stdio::null())
        .output()
        .map_err(|e| LaunchError::Spawn {
            program: "rasdial".to_string(),
            message: e.to_string(),
        })?;
    if output.status.success() {
        Ok(LaunchHandle::detached(format!("rasdial {connection}")))
    } else {
        Err(command_failed("rasdial", &output))
    }
}

fn connect_nmcli(connection: &str, secret: Option<&Secret>) -> Result<LaunchHandle, LaunchError> {
    let nmcli = Path::new("nmcli");
    let output = match secret {
        Some(secret) => run_with_input(
            nmcli,
            &["--ask", "connection", "up", "id", connection],
            &format!("{}\n", secret.expose()),
        )?,
        None => Command::new(nmcli)
            .args(["connection", "up", "id", connection])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| LaunchError::Spawn {
                program: "nmcli".to_string(),
                message: e.to_string(),
            })?,
    };
    if output.status.success() {
        Ok(LaunchHandle::detached(format!("nmcli {connection}")))
    } else {
        Err(command_failed("nmcli", &output))
    }
}

/// Script fed to `vpn -s`: connect, answer credentials, accept the banner
fn cisco_script(host: &str, username: Option<&str>, secret: Option<&Secret>) -> String {
    let mut script = format!("connect {host}\n");
    if let Some(user) = username {
        script.push_str(user);
        script.push('\n');
    }
    if let Some(secret) = secret {
        script.push_str(secret.expose());
        script.push('\n');
    }
    script.push_str("y\n");
    script
}

fn cisco_connected(output: &str) -> bool {
    output.lines().any(|line| {
        let line = line.to_lowercase();
        line.contains("state: connected")
    })
}

fn connect_cisco(
    cli: &Path,
    host: &str,
    username: Option<&str>,
    secret: Option<&Secret>,
) -> Result<LaunchHandle, LaunchError> {
    if !cli.exists() {
        return Err(LaunchError::NotFound(cli.display().to_string()));
    }

    // Drop a stale session first; failure here is expected when disconnected.
    let _ = Command::new(cli)
        .arg("disconnect")
        .stdin(Stdio::null())
        .output();

    let output = run_with_input(cli, &["-s"], &cisco_script(host, username, secret))?;
    if cisco_connected(&String::from_utf8_lossy(&output.stdout)) {
        Ok(LaunchHandle::detached(format!("cisco {host}")))
    } else {
        Err(command_failed("cisco vpn", &output))
    }
}
