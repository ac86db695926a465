//! Progress reporting and console summaries
//!
//! A spinner shows record and byte counters while sources are ingested or
//! keys are scanned. Headers and summaries are printed with `console` styling.

use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Redraw the counters every this many records
const UPDATE_EVERY: u64 = 1000;

/// Spinner with running counters
pub struct ProgressReporter {
    bar: ProgressBar,
    started: Instant,
}

impl ProgressReporter {
    /// Create a visible spinner
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// A reporter that draws nothing, for `--quiet`
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            started: Instant::now(),
        }
    }

    /// Update the counters for the current source
    pub fn update(&self, source: &str, records: u64, bytes: u64) {
        if records % UPDATE_EVERY != 0 {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { records as f64 / elapsed } else { 0.0 };
        self.bar.set_message(format!(
            "{} | Keys: {} | Size: {} | Rate: {:.0}/s",
            source,
            format_number(records),
            format_size(bytes, BINARY),
            rate,
        ));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the banner at the start of a command
pub fn print_header(command: &str, source: &str, work_dir: Option<&str>) {
    println!();
    println!(
        "{} {} {}",
        style("keyscope").cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        style(command).bold()
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    if let Some(dir) = work_dir {
        println!("  {} {}", style("Output:").bold(), dir);
    }
    println!();
}

/// Print the totals of an analysis run
pub fn print_summary(
    sources: usize,
    records: u64,
    bytes: u64,
    failed: usize,
    duration: Duration,
    reports: &[String],
) {
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        records as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Analysis Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Sources:").bold(), sources);
    println!("  {} {}", style("Keys:").bold(), format_number(records));
    println!("  {} {}", style("Total Size:").bold(), format_size(bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} keys/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if failed > 0 {
        println!("  {} {}", style("Failed sources:").yellow().bold(), failed);
    }
    for report in reports {
        println!("  {} {}", style("Report:").bold(), report);
    }
    println!();
}

/// Print the totals of a delete run
pub fn print_delete_summary(scanned: u64, deleted: u64, batches: u64, duration: Duration) {
    println!();
    println!("{}", style("Delete Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Scanned:").bold(), format_number(scanned));
    println!("  {} {}", style("Deleted:").bold(), format_number(deleted));
    println!("  {} {}", style("Batches:").bold(), format_number(batches));
    println!("  {} {:.1}s", style("Duration:").bold(), duration.as_secs_f64());
    println!();
}
