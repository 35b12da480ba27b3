//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a bytes-per-second rate as human-readable string
pub fn format_rate(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    if bytes_per_sec >= MB {
        format!("{:.2} MiB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.2} KiB/s", bytes_per_sec / KB)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

/// Format a value already expressed in megabytes
pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GiB", mb / 1024.0)
    } else {
        format!("{:.1} MiB", mb)
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "excellent" | "good" | "success" | "completed" | "running" | "healthy" => {
            status.green().to_string()
        }
        "fair" | "partial" | "paused" | "degraded" | "optimizing" | "analyzing" => {
            status.yellow().to_string()
        }
        "poor" | "critical" | "failed" | "error" | "unhealthy" | "cancelled" => {
            status.red().to_string()
        }
        "disabled" | "stopped" | "not_needed" | "not_supported" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Color a 0-100 performance score by band
pub fn color_score(score: u32) -> String {
    let formatted = score.to_string();
    if score >= 75 {
        formatted.green().to_string()
    } else if score >= 50 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(512.0), "512 B/s");
        assert_eq!(format_rate(2048.0), "2.00 KiB/s");
        assert_eq!(format_rate(3.5 * 1024.0 * 1024.0), "3.50 MiB/s");
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(512.0), "512.0 MiB");
        assert_eq!(format_mb(2048.0), "2.00 GiB");
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("good"), "good");
        assert_eq!(color_score(42), "42");
    }
}
