use colored::Colorize;
use launchkit::TargetOutcome;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored marker for a target outcome
pub fn outcome_marker(outcome: TargetOutcome) -> String {
    match outcome {
        TargetOutcome::LaunchedHealthy => "✓".green().to_string(),
        TargetOutcome::FailedAfterRetries => "✗".red().to_string(),
        TargetOutcome::SkippedDependencyFailed | TargetOutcome::SkippedCancelled => {
            "⊘".yellow().to_string()
        }
        TargetOutcome::SkippedByCondition | TargetOutcome::SkippedDisabled => {
            "-".dimmed().to_string()
        }
    }
}

/// Format a duration in seconds as "850ms", "4.2s" or "2m 05s"
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let total = secs.round() as u64;
        format!("{}m {:02}s", total / 60, total % 60)
    }
}

/// Horizontal bar of `width` cells filled in proportion to `value / max`
pub fn bar(value: f64, max: f64, width: usize) -> String {
    if max <= 0.0 || value <= 0.0 {
        return String::new();
    }
    let filled = ((value / max) * width as f64).round() as usize;
    "█".repeat(filled.clamp(1, width))
}
