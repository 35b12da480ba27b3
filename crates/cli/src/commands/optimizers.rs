//! Optimizer listing and on-demand optimization

use anyhow::Result;
use colored::Colorize;
use perf_lib::{optimizer::ResultStatus, OptimizationStrategy};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_percent, print_error, print_json, print_success, print_warning,
    OutputFormat,
};

/// Row for optimizers table
#[derive(Tabled)]
struct OptimizerRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Runs")]
    runs: u64,
    #[tabled(rename = "Success")]
    success_rate: String,
    #[tabled(rename = "Avg Time")]
    average_time: String,
    #[tabled(rename = "Last Run")]
    last_run: String,
}

/// List registered optimizers with their statistics
pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let optimizers = client.optimizers().await?;

    match format {
        OutputFormat::Json => print_json(&optimizers)?,
        OutputFormat::Table => {
            if optimizers.is_empty() {
                print_warning("No optimizers registered");
                return Ok(());
            }

            let rows: Vec<OptimizerRow> = optimizers
                .iter()
                .map(|o| OptimizerRow {
                    name: o.name.clone(),
                    status: o
                        .status
                        .map(|s| color_status(&s.to_string()))
                        .unwrap_or_else(|| "-".to_string()),
                    enabled: if o.enabled { "yes" } else { "no" }.to_string(),
                    runs: o.total_optimizations,
                    success_rate: format_percent(o.success_rate),
                    average_time: format!("{:.0} ms", o.average_time_ms),
                    last_run: o
                        .last_optimization
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".to_string()),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Run one optimizer now
pub async fn optimize(
    client: &ApiClient,
    name: &str,
    strategy: &str,
    format: OutputFormat,
) -> Result<()> {
    let strategy: OptimizationStrategy = strategy.parse().map_err(anyhow::Error::msg)?;
    let result = client.optimize(name, strategy).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            match result.status {
                ResultStatus::Success => print_success(&result.message),
                ResultStatus::Failed => print_error(&result.message),
                _ => print_warning(&result.message),
            }
            println!(
                "{}  {} in {} ms, improvement {}",
                "Result".bold(),
                color_status(result.status.as_str()),
                result.execution_time_ms,
                format_percent(result.improvement_percentage)
            );
            for (metric, delta) in &result.improvements {
                println!("  {:<28} {:+.2}", metric, delta);
            }
            for warning in &result.warnings {
                print_warning(warning);
            }
            for error in &result.errors {
                print_error(error);
            }
        }
    }

    Ok(())
}
