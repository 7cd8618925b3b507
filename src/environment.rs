//! Environment facts for condition gating
//!
//! The network identifier is the Wi-Fi SSID when one can be read, otherwise
//! the machine's primary local IPv4 address (so subnet conditions still work
//! on wired networks).

use crate::runner;
use chrono::Local;
use launchkit::{EnvironmentProvider, EnvironmentSnapshot};
use std::net::{IpAddr, UdpSocket};

/// Samples local time, weekday and the current network
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot::at(&Local::now(), current_network())
    }
}

/// SSID if on Wi-Fi, else the primary local IPv4 address
pub fn current_network() -> Option<String> {
    if let Some(ssid) = wifi_ssid() {
        log::debug!("Current network: SSID {ssid}");
        return Some(ssid);
    }
    let ip = local_ipv4().map(|ip| ip.to_string());
    log::debug!("Current network: {}", ip.as_deref().unwrap_or("unknown"));
    ip
}

#[cfg(target_os = "windows")]
fn wifi_ssid() -> Option<String> {
    runner::run_capture("netsh", &["wlan", "show", "interfaces"])
        .ok()
        .and_then(|out| parse_netsh_ssid(&out))
}

#[cfg(target_os = "macos")]
fn wifi_ssid() -> Option<String> {
    runner::run_capture("networksetup", &["-getairportnetwork", "en0"])
        .ok()
        .and_then(|out| parse_networksetup_ssid(&out))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn wifi_ssid() -> Option<String> {
    if runner::command_exists("iwgetid")
        && let Ok(ssid) = runner::run_capture("iwgetid", &["-r"])
        && !ssid.is_empty()
    {
        return Some(ssid);
    }
    runner::run_capture("nmcli", &["-t", "-f", "active,ssid", "dev", "wifi"])
        .ok()
        .and_then(|out| parse_nmcli_ssid(&out))
}

/// Local address of the interface that routes to the internet.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn local_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

/// `SSID : name` line of `netsh wlan show interfaces` (not `BSSID`)
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_netsh_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key.trim() == "SSID" && !value.is_empty()).then(|| value.to_string())
    })
}

/// "Current Wi-Fi Network: name"
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_networksetup_ssid(output: &str) -> Option<String> {
    output
        .split_once("Network:")
        .map(|(_, ssid)| ssid.trim().to_string())
        .filter(|ssid| !ssid.is_empty())
}

/// `yes:name` line of `nmcli -t -f active,ssid dev wifi`
#[cfg_attr(any(target_os = "windows", target_os = "macos"), allow(dead_code))]
fn parse_nmcli_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(str::to_string)
        .filter(|ssid| !ssid.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netsh_skips_bssid() {
        let output = "\
    Name                   : Wi-Fi
    State                  : connected
    SSID                   : Office 5G
    BSSID                  : aa:bb:cc:dd:ee:ff
";
        assert_eq!(parse_netsh_ssid(output).as_deref(), Some("Office 5G"));
        assert_eq!(parse_netsh_ssid("    State : disconnected"), None);
    }

    #[test]
    fn test_parse_networksetup() {
        assert_eq!(
            parse_networksetup_ssid("Current Wi-Fi Network: home-wifi").as_deref(),
            Some("home-wifi")
        );
        assert_eq!(
            parse_networksetup_ssid("You are not associated with an AirPort network."),
            None
        );
    }

    #[test]
    fn test_parse_nmcli() {
        let output = "no:Neighbour\nyes:office-wifi\nno:Cafe";
        assert_eq!(parse_nmcli_ssid(output).as_deref(), Some("office-wifi"));
        assert_eq!(parse_nmcli_ssid("no:Neighbour"), None);
    }

    #[test]
    fn test_snapshot_has_current_time() {
        let before = Local::now().time();
        let snapshot = SystemEnvironment.snapshot();
        let diff = (snapshot.time - before).num_seconds().abs();
        assert!(diff < 5 || diff > 86_000);
    }
}
