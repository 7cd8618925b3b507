//! Condition evaluation - decides whether a target may launch right now
//!
//! A [`Condition`] has three independent dimensions: a time-of-day range, a
//! set of weekdays and a set of expected networks. Each dimension is optional
//! and an absent dimension never reduces eligibility.
//!
//! Evaluation is pure: it only looks at the [`EnvironmentSnapshot`] taken once
//! at the start of a run, so every target in a run sees the same environment.
//!
//! String parsing (`FromStr`) is provided for the configuration layer. The
//! evaluator itself works on the parsed values only.

use crate::types::Target;
use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Error produced while parsing a condition string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionParseError {
    #[error("invalid time range '{0}' (expected HH:MM-HH:MM)")]
    TimeRange(String),

    #[error("invalid day selector '{0}' (expected weekdays, weekends, Mon-Fri or Mon,Wed,Fri)")]
    Days(String),

    #[error("invalid network selector '{0}'")]
    Network(String),
}

// ============================================================================
// Environment snapshot
// ============================================================================

/// The time/day/network facts a run is evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Local wall-clock time
    pub time: NaiveTime,
    pub weekday: Weekday,
    /// SSID-like identifier or IP address of the active network
    pub network_id: Option<String>,
}

impl EnvironmentSnapshot {
    pub fn new(time: NaiveTime, weekday: Weekday, network_id: Option<String>) -> Self {
        Self {
            time,
            weekday,
            network_id,
        }
    }

    /// Build a snapshot from any local date-time value
    pub fn at<T: Datelike + Timelike>(moment: &T, network_id: Option<String>) -> Self {
        let time = NaiveTime::from_hms_opt(moment.hour(), moment.minute(), moment.second())
            .unwrap_or(NaiveTime::MIN);
        Self::new(time, moment.weekday(), network_id)
    }
}

// ============================================================================
// Condition
// ============================================================================

/// Dimension of a condition, used to explain a skip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    TimeRange,
    Days,
    Networks,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeRange => f.write_str("time range"),
            Self::Days => f.write_str("days"),
            Self::Networks => f.write_str("networks"),
        }
    }
}

/// Eligibility condition attached to a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub time_range: Option<TimeRange>,
    pub days: Option<DaySet>,
    pub networks: Option<NetworkSet>,
}

impl Condition {
    /// A condition with no configured dimension (always satisfied)
    pub fn is_empty(&self) -> bool {
        self.time_range.is_none() && self.days.is_none() && self.networks.is_none()
    }

    /// First configured dimension that the snapshot does not satisfy
    pub fn unmet(&self, snapshot: &EnvironmentSnapshot) -> Option<ConditionKind> {
        if let Some(range) = &self.time_range
            && !range.contains(snapshot.time)
        {
            return Some(ConditionKind::TimeRange);
        }
        if let Some(days) = &self.days
            && !days.contains(snapshot.weekday)
        {
            return Some(ConditionKind::Days);
        }
        if let Some(networks) = &self.networks
            && !networks.matches(snapshot.network_id.as_deref())
        {
            return Some(ConditionKind::Networks);
        }
        None
    }

    pub fn is_satisfied_by(&self, snapshot: &EnvironmentSnapshot) -> bool {
        self.unmet(snapshot).is_none()
    }
}

/// Whether `target` may launch in the environment described by `snapshot`
pub fn is_eligible(target: &Target, snapshot: &EnvironmentSnapshot) -> bool {
    target
        .condition
        .as_ref()
        .is_none_or(|condition| condition.is_satisfied_by(snapshot))
}

// ============================================================================
// Time range
// ============================================================================

/// Half-open time-of-day window `[start, end)`.
///
/// When `end < start` the window wraps past midnight. `start == end` covers
/// the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl FromStr for TimeRange {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConditionParseError::TimeRange(s.to_string());
        let (start, end) = s.split_once('-').ok_or_else(err)?;
        let start = parse_clock(start).ok_or_else(err)?;
        let end = parse_clock(end).ok_or_else(err)?;
        Ok(Self { start, end })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Parse "H:MM" or "HH:MM"
fn parse_clock(s: &str) -> Option<NaiveTime> {
    let (hours, minutes) = s.trim().split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

// ============================================================================
// Day selector
// ============================================================================

/// A set of weekdays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySet(u8);

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl DaySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn weekdays() -> Self {
        Self::range(Weekday::Mon, Weekday::Fri)
    }

    pub fn weekends() -> Self {
        Self::range(Weekday::Sat, Weekday::Sun)
    }

    /// Contiguous range, wrapping past Sunday when `last` comes before `first`
    pub fn range(first: Weekday, last: Weekday) -> Self {
        let mut set = Self::empty();
        let mut day = first;
        loop {
            set.insert(day);
            if day == last {
                break;
            }
            day = day.succ();
        }
        set
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_DAYS.into_iter().filter(|day| self.contains(*day))
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl FromStr for DaySet {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConditionParseError::Days(s.to_string());
        let selector = s.trim().to_lowercase();

        match selector.as_str() {
            "weekdays" => return Ok(Self::weekdays()),
            "weekends" => return Ok(Self::weekends()),
            "daily" | "everyday" => return Ok(Self::range(Weekday::Mon, Weekday::Sun)),
            _ => {}
        }

        let mut set = Self::empty();
        for part in selector.split(',') {
            let part = part.trim();
            if let Some((first, last)) = part.split_once('-') {
                let first = parse_day(first).ok_or_else(err)?;
                let last = parse_day(last).ok_or_else(err)?;
                for day in Self::range(first, last).iter() {
                    set.insert(day);
                }
            } else {
                set.insert(parse_day(part).ok_or_else(err)?);
            }
        }

        if set.is_empty() {
            return Err(err());
        }
        Ok(set)
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|day| day.to_string()).collect();
        f.write_str(&names.join(","))
    }
}

fn parse_day(s: &str) -> Option<Weekday> {
    match s.trim() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

// ============================================================================
// Network selector
// ============================================================================

/// A set of expected networks; matches if any entry matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSet {
    entries: Vec<NetworkMatcher>,
}

/// One expected network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMatcher {
    /// SSID-like identifier, compared exactly
    Identifier(String),
    /// Address block; matches when the current network address lies inside
    Subnet(Subnet),
}

impl NetworkSet {
    pub fn new(entries: Vec<NetworkMatcher>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[NetworkMatcher] {
        &self.entries
    }

    pub fn matches(&self, network_id: Option<&str>) -> bool {
        let Some(network_id) = network_id else {
            return false;
        };
        let address = network_address(network_id);

        self.entries.iter().any(|entry| match entry {
            NetworkMatcher::Identifier(name) => name == network_id,
            NetworkMatcher::Subnet(subnet) => address.is_some_and(|addr| subnet.contains(addr)),
        })
    }
}

/// Interpret a network id as an address: a plain IP or the base of a CIDR block
fn network_address(network_id: &str) -> Option<IpAddr> {
    network_id
        .parse::<IpAddr>()
        .ok()
        .or_else(|| network_id.parse::<Subnet>().ok().map(|s| s.network))
}

impl FromStr for NetworkSet {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let entry = if part.contains('/') {
                match part.parse::<Subnet>() {
                    Ok(subnet) => NetworkMatcher::Subnet(subnet),
                    // SSIDs may legitimately contain '/'
                    Err(_) => NetworkMatcher::Identifier(part.to_string()),
                }
            } else {
                NetworkMatcher::Identifier(part.to_string())
            };
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(ConditionParseError::Network(s.to_string()));
        }
        Ok(Self { entries })
    }
}

impl fmt::Display for NetworkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|entry| match entry {
                NetworkMatcher::Identifier(name) => name.clone(),
                NetworkMatcher::Subnet(subnet) => subnet.to_string(),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// CIDR address block such as `192.168.1.0/24` or `fd00::/8`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    pub network: IpAddr,
    pub prefix: u8,
}

impl Subnet {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for Subnet {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConditionParseError::Network(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(err)?;
        let network: IpAddr = addr.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(err());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LaunchDescriptor;
    use std::path::PathBuf;

    fn at(hour: u32, minute: u32) -> EnvironmentSnapshot {
        EnvironmentSnapshot::new(
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            Weekday::Mon,
            None,
        )
    }

    fn target_with(condition: Condition) -> Target {
        Target::new(
            "app",
            LaunchDescriptor::Folder {
                path: PathBuf::from("/tmp"),
            },
        )
        .with_condition(condition)
    }

    #[test]
    fn test_business_hours_boundaries() {
        let condition = Condition {
            time_range: Some("9:00-17:00".parse().unwrap()),
            ..Default::default()
        };
        let target = target_with(condition);

        assert!(!is_eligible(&target, &at(8, 59)));
        assert!(is_eligible(&target, &at(9, 0)));
        assert!(is_eligible(&target, &at(16, 59)));
        assert!(!is_eligible(&target, &at(17, 0)));
    }

    #[test]
    fn test_time_range_wraps_midnight() {
        let range: TimeRange = "22:00-06:30".parse().unwrap();
        assert!(range.contains(NaiveTime::from_hms_opt(23, 15, 0).unwrap()));
        assert!(range.contains(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        assert!(range.contains(NaiveTime::from_hms_opt(6, 29, 0).unwrap()));
        assert!(!range.contains(NaiveTime::from_hms_opt(6, 30, 0).unwrap()));
        assert!(!range.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_time_range_equal_bounds_is_whole_day() {
        let range: TimeRange = "00:00-00:00".parse().unwrap();
        assert!(range.contains(NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
    }

    #[test]
    fn test_time_range_rejects_garbage() {
        assert!("9-17".parse::<TimeRange>().is_err());
        assert!("25:00-26:00".parse::<TimeRange>().is_err());
        assert!("09:00".parse::<TimeRange>().is_err());
        assert!("9:0-17:00".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_explicit_day_list() {
        let days: DaySet = "Mon,Wed,Fri".parse().unwrap();
        assert!(days.contains(Weekday::Mon));
        assert!(!days.contains(Weekday::Tue));
        assert!(days.contains(Weekday::Fri));

        let condition = Condition {
            days: Some(days),
            ..Default::default()
        };
        let snapshot = EnvironmentSnapshot::new(NaiveTime::MIN, Weekday::Tue, None);
        assert!(!is_eligible(&target_with(condition), &snapshot));
    }

    #[test]
    fn test_named_and_ranged_days() {
        let weekdays: DaySet = "weekdays".parse().unwrap();
        assert_eq!(weekdays, "Mon-Fri".parse().unwrap());
        assert!(!weekdays.contains(Weekday::Sat));

        let weekends: DaySet = "Weekends".parse().unwrap();
        assert!(weekends.contains(Weekday::Sun));
        assert!(!weekends.contains(Weekday::Mon));

        let wrapped: DaySet = "fri-mon".parse().unwrap();
        assert_eq!(wrapped.to_string(), "Mon,Fri,Sat,Sun");

        let single: DaySet = "Thursday".parse().unwrap();
        assert_eq!(single.iter().collect::<Vec<_>>(), vec![Weekday::Thu]);

        assert!("funday".parse::<DaySet>().is_err());
        assert!("".parse::<DaySet>().is_err());
    }

    #[test]
    fn test_network_identifier_exact_match() {
        let networks: NetworkSet = "HomeWifi, Office-5G".parse().unwrap();
        assert!(networks.matches(Some("Office-5G")));
        assert!(!networks.matches(Some("office-5g")));
        assert!(!networks.matches(None));
    }

    #[test]
    fn test_network_subnet_containment() {
        let networks: NetworkSet = "10.20.0.0/16,fd00::/8".parse().unwrap();
        assert!(networks.matches(Some("10.20.3.7")));
        assert!(!networks.matches(Some("10.21.0.1")));
        assert!(networks.matches(Some("fd12::1")));
        assert!(networks.matches(Some("10.20.5.0/24")));
        assert!(!networks.matches(Some("CorpWifi")));
    }

    #[test]
    fn test_subnet_rejects_bad_prefix() {
        assert!("10.0.0.0/33".parse::<Subnet>().is_err());
        assert!("10.0.0.0/abc".parse::<Subnet>().is_err());
        let all: Subnet = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn test_unconfigured_dimensions_never_reduce_eligibility() {
        let snapshot = at(3, 0);
        let plain = Target::new(
            "plain",
            LaunchDescriptor::Folder {
                path: PathBuf::from("/tmp"),
            },
        );
        assert!(is_eligible(&plain, &snapshot));
        assert!(is_eligible(&target_with(Condition::default()), &snapshot));
    }

    #[test]
    fn test_all_dimensions_are_anded() {
        let condition = Condition {
            time_range: Some("08:00-18:00".parse().unwrap()),
            days: Some("weekdays".parse().unwrap()),
            networks: Some("CorpWifi".parse().unwrap()),
        };
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

        let ok = EnvironmentSnapshot::new(time, Weekday::Wed, Some("CorpWifi".into()));
        assert_eq!(condition.unmet(&ok), None);

        let wrong_network = EnvironmentSnapshot::new(time, Weekday::Wed, Some("Cafe".into()));
        assert_eq!(condition.unmet(&wrong_network), Some(ConditionKind::Networks));

        let weekend = EnvironmentSnapshot::new(time, Weekday::Sat, Some("CorpWifi".into()));
        assert_eq!(condition.unmet(&weekend), Some(ConditionKind::Days));
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let condition = Condition {
            time_range: Some("9:00-17:00".parse().unwrap()),
            ..Default::default()
        };
        let target = target_with(condition);
        let snapshot = at(12, 0);
        let first = is_eligible(&target, &snapshot);
        for _ in 0..10 {
            assert_eq!(is_eligible(&target, &snapshot), first);
        }
    }

    #[test]
    fn test_snapshot_from_datetime() {
        let moment = chrono::NaiveDate::from_ymd_opt(2024, 5, 7)
            .unwrap()
            .and_hms_opt(14, 30, 15)
            .unwrap();
        let snapshot = EnvironmentSnapshot::at(&moment, Some("lab".into()));
        assert_eq!(snapshot.weekday, Weekday::Tue);
        assert_eq!(snapshot.time, NaiveTime::from_hms_opt(14, 30, 15).unwrap());
    }
}
