use colored::{ColoredString, Colorize};
use declarative::{RunReport, Status, Summary};

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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Status padded to a fixed width and colored
pub fn status_label(status: Status) -> ColoredString {
    let label = format!("{:<9}", status.to_string());
    match status {
        Status::InSync => label.green(),
        Status::Changed => label.cyan().bold(),
        Status::Failed => label.red().bold(),
        Status::Skipped => label.yellow(),
        Status::Noop => label.blue(),
        Status::Filtered => label.dimmed(),
    }
}

/// Format a duration in seconds for display
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:.0}s", minutes as u64, secs - minutes * 60.0)
    }
}

/// One-line summary: non-zero counts only, in a fixed order
pub fn summary_line(summary: &Summary) -> String {
    let counts = [
        (summary.changed, "changed"),
        (summary.in_sync, "in sync"),
        (summary.noop, "noop"),
        (summary.failed, "failed"),
        (summary.skipped, "skipped"),
        (summary.filtered, "filtered"),
    ];
    let parts: Vec<String> = counts
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{} {}", count, label))
        .collect();
    if parts.is_empty() {
        "no resources".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print a run report for humans
pub fn print_report(report: &RunReport) {
    header(if report.noop { "Catalog run (noop)" } else { "Catalog run" });

    for outcome in &report.outcomes {
        let provider = outcome
            .provider
            .as_deref()
            .map(|p| format!(" ({})", p))
            .unwrap_or_default();
        println!(
            "  {} {}{}",
            status_label(outcome.status),
            outcome.resource,
            provider.dimmed()
        );
        for change in &outcome.changes {
            dim(&format!("  {}", change));
        }
        if outcome.refreshed {
            dim("  refreshed");
        }
        if let Some(error) = &outcome.error {
            println!("      {}", error.red());
        }
    }

    println!();
    let line = format!(
        "{} in {}",
        summary_line(&report.summary),
        format_duration(report.duration_secs)
    );
    if report.is_success() {
        success(&line);
    } else {
        error(&line);
    }
}

// ============================================================================
// Tests
// ============================================================================
