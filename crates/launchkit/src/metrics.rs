//! Run records and the append-only metrics history

use crate::error::Result;
use crate::types::{ExecutionMode, TargetOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Relative change between history halves that still counts as stable
const TREND_BAND: f64 = 0.10;

/// Runs needed before a trend is reported
const TREND_MIN_RUNS: usize = 4;

// ============================================================================
// Records
// ============================================================================

/// Outcome of one target in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub name: String,
    pub phase: String,
    pub outcome: TargetOutcome,
    /// Launch attempts made (0 when never launched)
    pub attempts: u32,
    pub duration_ms: u64,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetRecord {
    /// Record for a target that never entered `Launching`
    pub fn skipped(
        name: impl Into<String>,
        phase: impl Into<String>,
        outcome: TargetOutcome,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            outcome,
            attempts: 0,
            duration_ms: 0,
            required,
            error: None,
        }
    }

    /// Retries beyond the first attempt
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Outcome of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub mode: ExecutionMode,
    pub duration_ms: u64,
    /// Member records in execution (sequential) or declaration (concurrent) order
    pub targets: Vec<TargetRecord>,
}

impl PhaseRecord {
    /// No required member failed
    pub fn succeeded(&self) -> bool {
        !self
            .targets
            .iter()
            .any(|t| t.required && t.outcome.is_failure())
    }

    pub fn count(&self, outcome: TargetOutcome) -> usize {
        self.targets.iter().filter(|t| t.outcome == outcome).count()
    }
}

/// One complete orchestration run, as appended to the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<String>,
    pub phases: Vec<PhaseRecord>,
    /// The run was not cancelled and no required target failed after retries
    pub success: bool,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunRecord {
    pub fn duration_secs(&self) -> f64 {
        let millis = (self.finished_at - self.started_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetRecord> {
        self.phases.iter().flat_map(|p| p.targets.iter())
    }

    pub fn target(&self, name: &str) -> Option<&TargetRecord> {
        self.targets().find(|t| t.name == name)
    }

    pub fn count(&self, outcome: TargetOutcome) -> usize {
        self.targets().filter(|t| t.outcome == outcome).count()
    }

    /// `(target, message)` for every failed target, in run order
    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.targets()
            .filter(|t| t.outcome.is_failure())
            .map(|t| (t.name.as_str(), t.error.as_deref().unwrap_or("failed")))
            .collect()
    }

    /// Targets that needed at least one retry, with the retry count
    pub fn retry_counts(&self) -> Vec<(&str, u32)> {
        self.targets()
            .filter(|t| t.retries() > 0)
            .map(|t| (t.name.as_str(), t.retries()))
            .collect()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Durable append-only storage for run records
pub trait MetricsSink: Send + Sync {
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// All stored records, oldest first
    fn load(&self) -> Result<Vec<RunRecord>>;
}

/// Newline-delimited JSON file, one run per line
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlSink {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "Skipping malformed metrics line {} in {}: {e}",
                    number + 1,
                    self.path.display()
                ),
            }
        }
        Ok(records)
    }
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RunRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for MemorySink {
    fn append(&self, record: &RunRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<RunRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

// ============================================================================
// Recorder and summaries
// ============================================================================

/// Direction of startup durations across the summarized window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Recent runs are faster
    Improving,
    /// Recent runs are slower
    Degrading,
    Stable,
    /// Too few runs to tell
    Insufficient,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Improving => "improving",
            Self::Degrading => "degrading",
            Self::Stable => "stable",
            Self::Insufficient => "insufficient data",
        };
        f.write_str(name)
    }
}

/// Aggregate statistics over the most recent runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub runs: usize,
    pub successful: usize,
    /// Percentage of successful runs, 0 to 100
    pub success_rate: f64,
    pub avg_duration_secs: f64,
    pub trend: Trend,
    pub last_run: Option<DateTime<Utc>>,
}

/// Summarize the last `last_n` runs of `records` (oldest first).
///
/// `None` summarizes everything. An empty window yields zeroed statistics.
pub fn summarize(records: &[RunRecord], last_n: Option<usize>) -> Summary {
    let window = match last_n {
        Some(n) => &records[records.len().saturating_sub(n)..],
        None => records,
    };

    if window.is_empty() {
        return Summary {
            runs: 0,
            successful: 0,
            success_rate: 0.0,
            avg_duration_secs: 0.0,
            trend: Trend::Insufficient,
            last_run: None,
        };
    }

    let runs = window.len();
    let successful = window.iter().filter(|r| r.success).count();
    let durations: Vec<f64> = window.iter().map(RunRecord::duration_secs).collect();

    Summary {
        runs,
        successful,
        success_rate: successful as f64 * 100.0 / runs as f64,
        avg_duration_secs: mean(&durations),
        trend: trend(&durations),
        last_run: window.last().map(|r| r.started_at),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Compare the older and newer halves of a duration series
fn trend(durations: &[f64]) -> Trend {
    if durations.len() < TREND_MIN_RUNS {
        return Trend::Insufficient;
    }
    let half = durations.len() / 2;
    let older = mean(&durations[..half]);
    let newer = mean(&durations[durations.len() - half..]);

    if older <= f64::EPSILON {
        return if newer <= f64::EPSILON {
            Trend::Stable
        } else {
            Trend::Degrading
        };
    }

    let change = (newer - older) / older;
    if change < -TREND_BAND {
        Trend::Improving
    } else if change > TREND_BAND {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

/// Appends run records and answers history queries
#[derive(Clone)]
pub struct MetricsRecorder {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsRecorder {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// Recorder backed by a JSONL file
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonlSink::new(path)))
    }

    pub fn record(&self, record: &RunRecord) -> Result<()> {
        self.sink.append(record)?;
        log::debug!(
            "Recorded run started at {} (success: {})",
            record.started_at,
            record.success
        );
        Ok(())
    }

    /// Up to `limit` most recent runs, most recent first
    pub fn history(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let records = self.sink.load()?;
        Ok(records.into_iter().rev().take(limit).collect())
    }

    pub fn summarize(&self, last_n: Option<usize>) -> Result<Summary> {
        Ok(summarize(&self.sink.load()?, last_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn run(minute: u32, secs: i64, success: bool) -> RunRecord {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 4, 8, minute, 0).unwrap();
        RunRecord {
            started_at,
            finished_at: started_at + Duration::seconds(secs),
            profile: None,
            phases: Vec::new(),
            success,
            cancelled: false,
        }
    }

    fn with_targets(mut record: RunRecord) -> RunRecord {
        record.phases.push(PhaseRecord {
            name: "apps".into(),
            mode: ExecutionMode::Sequential,
            duration_ms: 1200,
            targets: vec![
                TargetRecord {
                    name: "ide".into(),
                    phase: "apps".into(),
                    outcome: TargetOutcome::LaunchedHealthy,
                    attempts: 3,
                    duration_ms: 900,
                    required: true,
                    error: None,
                },
                TargetRecord {
                    name: "chat".into(),
                    phase: "apps".into(),
                    outcome: TargetOutcome::FailedAfterRetries,
                    attempts: 2,
                    duration_ms: 300,
                    required: false,
                    error: Some("health check failed".into()),
                },
                TargetRecord::skipped("mail", "apps", TargetOutcome::SkippedDisabled, true),
            ],
        });
        record
    }

    #[test]
    fn test_jsonl_append_and_load() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("state/metrics.jsonl"));

        sink.append(&with_targets(run(0, 12, true))).unwrap();
        sink.append(&run(1, 30, false)).unwrap();

        let loaded = sink.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], with_targets(run(0, 12, true)));
        assert!(!loaded[1].success);

        let content = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_concurrent_appends_keep_lines_whole() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 25;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let recorder = MetricsRecorder::jsonl(&path);

        std::thread::scope(|scope| {
            for thread in 0..THREADS {
                let recorder = &recorder;
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        let mut record = with_targets(run(thread, i64::from(i), true));
                        record.profile = Some(format!("worker-{thread}-{i}"));
                        recorder.record(&record).unwrap();
                    }
                });
            }
        });

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), (THREADS * PER_THREAD) as usize);
        for line in &lines {
            let record: RunRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.phases[0].targets.len(), 2);
        }

        let mut profiles: Vec<String> = recorder
            .history(usize::MAX)
            .unwrap()
            .into_iter()
            .filter_map(|r| r.profile)
            .collect();
        profiles.sort();
        profiles.dedup();
        assert_eq!(profiles.len(), (THREADS * PER_THREAD) as usize);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("metrics.jsonl"));
        assert!(sink.load().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let good = serde_json::to_string(&run(0, 5, true)).unwrap();
        fs::write(&path, format!("{good}\nnot json\n\n{{\"partial\": 1}}\n{good}\n")).unwrap();

        let loaded = JsonlSink::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_history_is_most_recent_first() {
        let recorder = MetricsRecorder::new(Arc::new(MemorySink::new()));
        for minute in 0..5 {
            recorder.record(&run(minute, 10, true)).unwrap();
        }

        let history = recorder.history(3).unwrap();
        let minutes: Vec<_> = history
            .iter()
            .map(|r| r.started_at.format("%M").to_string())
            .collect();
        assert_eq!(minutes, vec!["04", "03", "02"]);
    }

    #[test]
    fn test_summary_statistics() {
        let records = vec![run(0, 10, true), run(1, 20, false), run(2, 30, true), run(3, 40, true)];
        let summary = summarize(&records, None);

        assert_eq!(summary.runs, 4);
        assert_eq!(summary.successful, 3);
        assert!((summary.success_rate - 75.0).abs() < 1e-9);
        assert!((summary.avg_duration_secs - 25.0).abs() < 1e-9);
        assert_eq!(summary.trend, Trend::Degrading);
        assert_eq!(summary.last_run, Some(records[3].started_at));
    }

    #[test]
    fn test_summary_window_uses_last_runs() {
        let records = vec![run(0, 100, false), run(1, 10, true), run(2, 10, true)];
        let summary = summarize(&records, Some(2));
        assert_eq!(summary.runs, 2);
        assert!((summary.success_rate - 100.0).abs() < 1e-9);
        assert_eq!(summary.trend, Trend::Insufficient);
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = summarize(&[], Some(10));
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.last_run, None);
    }

    #[test]
    fn test_summarize_is_pure() {
        let records = vec![run(0, 10, true), run(1, 12, true)];
        assert_eq!(summarize(&records, None), summarize(&records, None));
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(trend(&[30.0, 30.0, 10.0, 10.0]), Trend::Improving);
        assert_eq!(trend(&[10.0, 10.0, 10.5, 10.5]), Trend::Stable);
        assert_eq!(trend(&[10.0, 10.0, 12.0, 12.0]), Trend::Degrading);
        assert_eq!(trend(&[0.0, 0.0, 0.0, 0.0]), Trend::Stable);
        assert_eq!(trend(&[10.0, 10.0]), Trend::Insufficient);
    }

    #[test]
    fn test_run_record_helpers() {
        let record = with_targets(run(0, 12, true));
        assert!((record.duration_secs() - 12.0).abs() < 1e-9);
        assert_eq!(record.errors(), vec![("chat", "health check failed")]);
        assert_eq!(record.retry_counts(), vec![("ide", 2), ("chat", 1)]);
        assert_eq!(record.count(TargetOutcome::SkippedDisabled), 1);
        assert!(record.phases[0].succeeded());
        assert_eq!(record.target("mail").unwrap().attempts, 0);
    }
}
