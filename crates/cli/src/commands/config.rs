//! Local engine configuration commands

use anyhow::{Context, Result};
use colored::Colorize;
use perf_lib::PerformanceConfig;
use std::path::Path;

use crate::output::{print_info, print_json, print_success, OutputFormat};

fn load(path: &Path) -> Result<PerformanceConfig> {
    if !path.exists() {
        print_info(&format!("{} does not exist, using defaults", path.display()));
    }
    PerformanceConfig::load(path).with_context(|| format!("Invalid config {}", path.display()))
}

/// Check a configuration file without contacting the agent
pub fn validate(path: &Path) -> Result<()> {
    let config = load(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    print_success(&format!("{} is valid", path.display()));
    Ok(())
}

/// Print the effective configuration, defaults filled in
pub fn show(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load(path)?;

    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => {
            let value = serde_json::to_value(&config)?;
            if let Some(categories) = value.as_object() {
                for (category, entries) in categories {
                    println!("{}", category.bold());
                    if let Some(entries) = entries.as_object() {
                        for (key, value) in entries {
                            println!("  {:<28} {}", key, value);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_saved_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        PerformanceConfig::default().save(&path).unwrap();
        validate(&path).unwrap();
        show(&path, OutputFormat::Table).unwrap();
    }

    #[test]
    fn test_validate_rejects_out_of_range_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        std::fs::write(&path, r#"{"monitoring": {"interval_ms": 5}}"#).unwrap();
        let err = validate(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("interval_ms"));
    }
}
