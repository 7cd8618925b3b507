use anyhow::{Context as _, Result};
use chrono::Local;
use colored::Colorize;

use crate::paths;
use crate::ui;
use launchkit::{MetricsRecorder, RunRecord, Summary, TargetOutcome, Trend};

const CHART_WIDTH: usize = 40;
const CHART_RUNS: usize = 20;

fn recorder() -> Result<MetricsRecorder> {
    Ok(MetricsRecorder::jsonl(paths::metrics_file()?))
}

/// `ignition history`
pub fn history(limit: usize) -> Result<()> {
    let records = recorder()?
        .history(limit)
        .context("Failed to read run history")?;

    ui::header("Recent runs");
    if records.is_empty() {
        ui::info("No runs recorded yet");
        return Ok(());
    }

    for record in &records {
        println!("{}", history_line(record));
        for (name, error) in record.errors() {
            ui::dim(&format!("  {name}: {error}"));
        }
    }
    Ok(())
}

fn history_line(record: &RunRecord) -> String {
    let status = if record.cancelled {
        format!("{:<9}", "cancelled").yellow()
    } else if record.success {
        format!("{:<9}", "ok").green()
    } else {
        format!("{:<9}", "failed").red()
    };
    let skipped = record.targets().filter(|t| t.outcome.is_skipped()).count();

    format!(
        "  {}  {:>8}  {}  {} launched, {} failed, {} skipped{}",
        record
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M"),
        ui::format_duration(record.duration_secs()),
        status,
        record.count(TargetOutcome::LaunchedHealthy),
        record.count(TargetOutcome::FailedAfterRetries),
        skipped,
        record
            .profile
            .as_deref()
            .map(|p| format!("  [{p}]"))
            .unwrap_or_default()
    )
}

/// `ignition summary`
pub fn summary(last: Option<usize>, json: bool) -> Result<()> {
    let recorder = recorder()?;
    let summary = recorder
        .summarize(last)
        .context("Failed to read run history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    ui::header("Startup summary");
    print_summary(&summary);

    let mut recent = recorder.history(last.unwrap_or(CHART_RUNS).min(CHART_RUNS))?;
    if recent.len() > 1 {
        recent.reverse();
        ui::section("Duration per run");
        for line in chart_lines(&recent, CHART_WIDTH) {
            println!("{line}");
        }
    }

    let mut retries: Vec<(String, u32)> = Vec::new();
    for record in &recent {
        for (name, count) in record.retry_counts() {
            match retries.iter_mut().find(|(n, _)| n.as_str() == name) {
                Some((_, total)) => *total += count,
                None => retries.push((name.to_string(), count)),
            }
        }
    }
    if !retries.is_empty() {
        retries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ui::section("Retries");
        for (name, count) in retries {
            ui::kv(&name, &count.to_string());
        }
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    if summary.runs == 0 {
        ui::info("No runs recorded yet");
        return;
    }
    ui::kv("Runs", &summary.runs.to_string());
    ui::kv(
        "Success rate",
        &format!(
            "{:.1}% ({}/{})",
            summary.success_rate, summary.successful, summary.runs
        ),
    );
    ui::kv(
        "Average duration",
        &ui::format_duration(summary.avg_duration_secs),
    );
    let trend = match summary.trend {
        Trend::Improving => summary.trend.to_string().green(),
        Trend::Degrading => summary.trend.to_string().red(),
        Trend::Stable | Trend::Insufficient => summary.trend.to_string().normal(),
    };
    ui::kv("Trend", &trend.to_string());
    if let Some(last) = summary.last_run {
        ui::kv(
            "Last run",
            &last.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        );
    }
}

/// One bar per run, oldest first, scaled to the slowest run
fn chart_lines(records: &[RunRecord], width: usize) -> Vec<String> {
    let max = records
        .iter()
        .map(RunRecord::duration_secs)
        .fold(0.0_f64, f64::max);

    records
        .iter()
        .map(|record| {
            let secs = record.duration_secs();
            let bar = format!("{:<width$}", ui::bar(secs, max, width));
            let bar = if record.success { bar.green() } else { bar.red() };
            format!(
                "  {}  {}  {}",
                record.started_at.with_timezone(&Local).format("%m-%d %H:%M"),
                bar,
                ui::format_duration(secs)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(secs: i64, success: bool) -> RunRecord {
        let started = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        RunRecord {
            started_at: started,
            finished_at: started + Duration::seconds(secs),
            profile: None,
            phases: Vec::new(),
            success,
            cancelled: false,
        }
    }

    #[test]
    fn test_chart_scales_to_slowest_run() {
        colored::control::set_override(false);
        let lines = chart_lines(&[record(10, true), record(20, false)], 10);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].matches('█').count(), 5);
        assert_eq!(lines[1].matches('█').count(), 10);
        assert!(lines[1].ends_with("20.0s"));
    }

    #[test]
    fn test_history_line() {
        colored::control::set_override(false);
        let mut run = record(5, false);
        run.profile = Some("office".into());
        let line = history_line(&run);
        assert!(line.contains("failed"));
        assert!(line.contains("[office]"));
        assert!(line.contains("5.0s"));
    }
}
