//! Terminal progress for launch runs.

use crate::ui;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use launchkit::{ExecutionMode, PhaseRecord, ProgressCallback, TargetRecord};

/// One progress bar per phase; finished targets are printed above it
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
    hidden: bool,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: None,
            quiet,
            hidden: false,
        }
    }

    /// Track progress without drawing anything
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            bar: None,
            quiet: true,
            hidden: true,
        }
    }

    fn print(&self, line: &str) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_phase_start(&mut self, name: &str, mode: ExecutionMode, count: usize) {
        if !self.quiet {
            ui::section(&format!("{name} ({mode})"));
        }

        let bar = ProgressBar::new(count as u64);
        if self.quiet || self.hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_target_start(&mut self, name: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(name.to_string());
        }
    }

    fn on_target_complete(&mut self, record: &TargetRecord) {
        let mut line = format!(
            "  {} {} {}",
            ui::outcome_marker(record.outcome),
            record.name,
            record.outcome.label().dimmed()
        );
        if record.attempts > 1 {
            line.push_str(&format!(" ({} attempts)", record.attempts));
        }
        if let Some(error) = &record.error {
            line.push_str(&format!(" {}", error.red()));
        }
        self.print(&line);

        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_phase_complete(&mut self, record: &PhaseRecord) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.print(&format!(
            "  {}",
            format!(
                "{} in {}",
                record.name,
                ui::format_duration(record.duration_ms as f64 / 1000.0)
            )
            .dimmed()
        ));
    }
}
