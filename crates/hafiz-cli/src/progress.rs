//! Terminal feedback for running transfers

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Create a spinner for a transfer whose progress is not reported incrementally
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Hidden bar used when output is suppressed
pub fn hidden() -> ProgressBar {
    ProgressBar::hidden()
}

/// Format bytes as human readable string
pub fn format_bytes(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Format duration as human readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// "12 MiB in 3s (4 MiB/s)"
pub fn transfer_summary(bytes: u64, elapsed: Duration) -> String {
    let millis = elapsed.as_millis().max(1) as u64;
    let rate = bytes.saturating_mul(1000) / millis;
    format!(
        "{} in {} ({}/s)",
        format_bytes(bytes),
        format_duration(elapsed.as_secs()),
        format_bytes(rate)
    )
}
