//! Subcommand implementations

pub mod config;
pub mod metrics;
pub mod optimizers;

use anyhow::{bail, Context, Result};

/// Parse a window such as `90s`, `30m`, `24h` or `7d` into seconds.
/// A bare number is taken as seconds.
pub fn parse_window(window: &str) -> Result<i64> {
    let window = window.trim();
    let (digits, unit) = match window.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => window.split_at(idx),
        None => (window, "s"),
    };
    let value: i64 = digits
        .parse()
        .with_context(|| format!("Invalid window '{}'", window))?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => bail!("Unknown window unit '{}' (use s, m, h or d)", other),
    };
    if value <= 0 {
        bail!("Window must be positive, got '{}'", window);
    }
    Ok(value * multiplier)
}
