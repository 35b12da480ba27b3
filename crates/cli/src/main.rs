//! perfctl - operator CLI for the performance engine
//!
//! Queries a running perf-agent for reports, metrics and optimizer state,
//! triggers optimizations, and validates engine configuration offline.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{config, metrics, optimizers};
use std::path::PathBuf;

/// Performance engine CLI
#[derive(Parser)]
#[command(name = "perfctl")]
#[command(author, version, about = "CLI for the performance monitoring engine", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via PERFCTL_API_URL env var)
    #[arg(long, env = "PERFCTL_API_URL", default_value = "http://localhost:8080/")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current performance report
    Report,

    /// Query collected metrics
    #[command(subcommand)]
    Metrics(MetricsCommands),

    /// Inspect optimizers
    #[command(subcommand)]
    Optimizers(OptimizersCommands),

    /// Run an optimizer now
    Optimize {
        /// Optimizer name (memory, render, startup)
        name: String,

        /// Strategy (conservative, balanced, aggressive)
        #[arg(long, default_value = "balanced")]
        strategy: String,
    },

    /// Export metrics history
    Export {
        /// Time window to export (e.g., 1h, 24h, 7d)
        #[arg(long, default_value = "24h")]
        window: String,

        /// Output file path
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Work with engine configuration files locally
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum MetricsCommands {
    /// Show the latest snapshot
    Latest,

    /// Aggregate snapshots over a window
    Aggregate {
        /// Time window (e.g., 15m, 1h, 1d)
        #[arg(long, default_value = "1h")]
        window: String,

        /// Aggregation (avg, max, min, sum, count)
        #[arg(long, default_value = "avg")]
        agg: String,
    },
}

#[derive(Subcommand)]
pub enum OptimizersCommands {
    /// List optimizers and their statistics
    List,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        path: PathBuf,
    },

    /// Show the effective configuration
    Show {
        /// Path to the configuration file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Local commands never need the agent
    if let Commands::Config(config_cmd) = &cli.command {
        return match config_cmd {
            ConfigCommands::Validate { path } => config::validate(path),
            ConfigCommands::Show { path } => config::show(path, cli.format),
        };
    }

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Report => metrics::show_report(&client, cli.format).await?,
        Commands::Metrics(metrics_cmd) => match metrics_cmd {
            MetricsCommands::Latest => metrics::show_latest(&client, cli.format).await?,
            MetricsCommands::Aggregate { window, agg } => {
                metrics::show_aggregate(&client, &window, &agg, cli.format).await?;
            }
        },
        Commands::Optimizers(OptimizersCommands::List) => {
            optimizers::list(&client, cli.format).await?;
        }
        Commands::Optimize { name, strategy } => {
            optimizers::optimize(&client, &name, &strategy, cli.format).await?;
        }
        Commands::Export { window, output } => {
            metrics::export(&client, &window, output.as_deref(), cli.format).await?;
        }
        Commands::Config(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["perfctl", "report"]).unwrap();
        assert_eq!(cli.format, output::OutputFormat::Table);
        assert!(matches!(cli.command, Commands::Report));
    }

    #[test]
    fn test_metrics_aggregate_args() {
        let cli = Cli::try_parse_from([
            "perfctl", "--format", "json", "metrics", "aggregate", "--window", "15m", "--agg", "max",
        ])
        .unwrap();
        assert_eq!(cli.format, output::OutputFormat::Json);
        match cli.command {
            Commands::Metrics(MetricsCommands::Aggregate { window, agg }) => {
                assert_eq!(window, "15m");
                assert_eq!(agg, "max");
            }
            _ => panic!("expected metrics aggregate"),
        }
    }

    #[test]
    fn test_optimize_and_export_args() {
        let cli = Cli::try_parse_from(["perfctl", "optimize", "memory", "--strategy", "aggressive"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Optimize { ref name, ref strategy } if name == "memory" && strategy == "aggressive"
        ));

        let cli = Cli::try_parse_from(["perfctl", "export", "-o", "out.json"]).unwrap();
        match cli.command {
            Commands::Export { window, output } => {
                assert_eq!(window, "24h");
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_optimize_requires_name() {
        assert!(Cli::try_parse_from(["perfctl", "optimize"]).is_err());
        assert!(Cli::try_parse_from(["perfctl", "--format", "yaml", "report"]).is_err());
    }
}
