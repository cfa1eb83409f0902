//! Transfer progress display with progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use skiff_core::{TransferError, TransferObserver, TransferReport};

/// Transfer progress tracker
pub struct TransferProgress {
    bar: ProgressBar,
    total_bytes: u64,
}

impl TransferProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(format!("Sending: {filename}"));

        Self { bar, total_bytes }
    }
}

impl TransferObserver for TransferProgress {
    fn on_progress(&self, percent: f64) {
        let position = (self.total_bytes as f64 * percent / 100.0).round() as u64;
        self.bar.set_position(position.min(self.total_bytes));
    }

    fn on_complete(&self, report: &TransferReport) {
        self.bar.finish_with_message(format!(
            "Sent {} in {} chunks",
            report.file_name, report.chunks_sent
        ));
    }

    fn on_error(&self, error: &TransferError) {
        self.bar.abandon_with_message(format!("Transfer failed: {error}"));
    }
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```text
/// format_bytes(1024)        == "1.00 KB"
/// format_bytes(1024 * 1024) == "1.00 MB"
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}
