pub mod cache;
pub mod completions;
pub mod diff;
pub mod digest;
pub mod gc;
pub mod patch;
pub mod update;
pub mod verify;

use hoist_core::{StatusObserver, UpdateState, Updater};
use hoist_remote::{DownloaderConfig, RemoteError};
use hoist_schema::{parse_descriptor_file, AppDescriptor, Resource, DESCRIPTOR_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Percentage bar for patching and downloads. Hidden in JSON mode.
pub fn percent_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{msg:<18} [{bar:30.cyan/blue}] {pos:>3}%")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb
}

pub fn colorize_state(state: UpdateState) -> String {
    use console::Style;
    let label = state.to_string();
    match state {
        UpdateState::Launch => Style::new().green().apply_to(label).to_string(),
        UpdateState::FetchPatch | UpdateState::ApplyPatch => {
            Style::new().cyan().apply_to(label).to_string()
        }
        UpdateState::FetchResources => Style::new().yellow().apply_to(label).to_string(),
        _ => label,
    }
}

/// Renders updater status on a terminal progress bar.
pub struct TerminalStatus {
    bar: ProgressBar,
}

impl TerminalStatus {
    pub fn new(hidden: bool) -> Self {
        Self {
            bar: percent_bar(hidden),
        }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl StatusObserver for TerminalStatus {
    fn state_changed(&self, state: UpdateState) {
        self.bar.set_position(0);
        self.bar.set_message(colorize_state(state));
    }

    fn download_progress(&self, percent: u8, remaining: Option<Duration>) {
        self.bar.set_position(u64::from(percent));
        if let Some(left) = remaining.filter(|_| percent < 100) {
            self.bar.set_message(format!("~{}s left", left.as_secs()));
        }
    }

    fn patch_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn resource_failed(&self, resource: &Resource, error: &RemoteError) {
        self.bar.println(format!("  failed {}: {error}", resource.path()));
    }
}

pub fn load_descriptor(app: &Path) -> Result<AppDescriptor, String> {
    let path = app.join(DESCRIPTOR_FILE);
    parse_descriptor_file(&path)
        .map_err(|e| format!("failed to read descriptor {}: {e}", path.display()))
}

pub fn open_updater(app: &Path, config: Option<&Path>) -> Result<Updater, String> {
    let config = match config {
        Some(path) => DownloaderConfig::load(path),
        None => DownloaderConfig::load_default(),
    }
    .map_err(|e| format!("downloader config: {e}"))?;
    Updater::open(app, &config).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_keeps_label() {
        assert!(colorize_state(UpdateState::Launch).contains("launch"));
        assert!(colorize_state(UpdateState::ApplyPatch).contains("apply-patch"));
        assert_eq!(colorize_state(UpdateState::VerifyResources), "verify-resources");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_MANIFEST_ERROR,
            EXIT_STORE_ERROR,
            EXIT_INTERRUPTED,
        ];
        for (i, a) in codes.iter().enumerate() {
            assert!(codes[i + 1..].iter().all(|b| a != b));
        }
    }

    #[test]
    fn missing_descriptor_is_a_descriptor_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_descriptor(dir.path()).unwrap_err();
        assert!(err.starts_with("failed to read descriptor"));
    }

    #[test]
    fn terminal_status_tracks_percent() {
        let status = TerminalStatus::new(true);
        status.state_changed(UpdateState::FetchResources);
        status.download_progress(42, Some(Duration::from_secs(3)));
        assert_eq!(status.bar().position(), 42);
        status.state_changed(UpdateState::VerifyResources);
        assert_eq!(status.bar().position(), 0);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        assert!(pb.is_finished());
    }
}
