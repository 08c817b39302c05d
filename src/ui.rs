//! Terminal stage reporting for the one-shot CLI: a spinner on a TTY, plain lines otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Announce a stage. The returned guard reports the outcome and elapsed time.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

/// Reports success on drop unless `finish` was given an error.
pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failure: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failure: None,
        }
    }

    /// Update the spinner text (plain mode prints a line).
    pub fn progress(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(format!("{}: {}…", self.name, message)),
            None => eprintln!("    {}", message),
        }
    }

    /// End the stage with the outcome of `result`.
    pub fn finish<T, E: std::fmt::Display>(mut self, result: &Result<T, E>) {
        self.record(result);
    }

    fn record<T, E: std::fmt::Display>(&mut self, result: &Result<T, E>) {
        if let Err(e) = result {
            self.failure = Some(e.to_string());
        }
    }

    fn summary(&self) -> String {
        let elapsed = format_duration(self.start.elapsed());
        match &self.failure {
            None => format!("✔ {} ({})", self.name, elapsed),
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = self.summary();
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_tty_never_uses_spinner() {
        let ui = Ui::from_args(Some("pretty"), false, false);
        assert!(!ui.use_pretty());
    }

    #[test]
    fn auto_mode_respects_disable_flag() {
        assert!(Ui::from_args(None, true, false).use_pretty());
        assert!(!Ui::from_args(None, true, true).use_pretty());
        assert!(!Ui::from_args(Some("plain"), true, false).use_pretty());
    }

    #[test]
    fn errored_result_marks_stage_failed() {
        let mut stage = StageGuard::new("Capture and upload".to_string(), None);
        stage.record(&Err::<(), _>("pipeline busy (capturing)"));
        let summary = stage.summary();
        assert!(summary.starts_with("✘ Capture and upload"), "{}", summary);
        assert!(summary.ends_with(": pipeline busy (capturing)"), "{}", summary);
    }

    #[test]
    fn ok_result_marks_stage_done() {
        let mut stage = StageGuard::new("Opening camera".to_string(), None);
        stage.record(&Ok::<_, String>(()));
        assert!(stage.summary().starts_with("✔ Opening camera"));
    }

    #[test]
    fn format_duration_switches_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
