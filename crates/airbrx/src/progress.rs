use airbrx_core::ProgressObserver;
use airbrx_core::pipeline::{PhaseReport, PhaseStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a running deployment. Finished phases are printed above it.
pub struct DeployProgress {
    progress_bar: ProgressBar,
}

impl DeployProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Connecting...");

        Self { progress_bar: pb }
    }

    /// Observer handed to the deployer; shares the spinner
    pub fn observer(&self) -> Box<dyn ProgressObserver> {
        Box::new(SpinnerObserver {
            progress_bar: self.progress_bar.clone(),
        })
    }

    pub fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }
}

struct SpinnerObserver {
    progress_bar: ProgressBar,
}

impl ProgressObserver for SpinnerObserver {
    fn phase_started(&self, index: usize, total: usize, phase: &str) {
        self.progress_bar
            .set_message(format!("[{}/{}] {}", index, total, phase));
    }

    fn step_started(&self, phase: &str, step: &str) {
        self.progress_bar.set_message(format!("{} / {}", phase, step));
    }

    fn phase_finished(&self, report: &PhaseReport) {
        let marker = match report.status {
            PhaseStatus::Completed => "✓".green(),
            PhaseStatus::CompletedWithWarnings => "!".yellow(),
        };
        self.progress_bar.println(format!(
            "  {} {} ({} actions, {:.1}s)",
            marker,
            report.name.bold(),
            report.actions.len(),
            report.duration_ms as f64 / 1000.0
        ));
    }
}
