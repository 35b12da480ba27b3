//! Report, metrics and export commands

use anyhow::{Context, Result};
use colored::Colorize;
use perf_lib::{collector::AggregationType, PerformanceMetrics};
use std::path::Path;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::commands::parse_window;
use crate::output::{
    color_score, color_status, format_mb, format_percent, format_rate, print_info, print_json,
    print_success, print_warning, OutputFormat,
};

/// Row for the metric table
#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Row for the monitor table
#[derive(Tabled)]
struct MonitorRow {
    #[tabled(rename = "Monitor")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "History")]
    history: usize,
    #[tabled(rename = "Errors")]
    errors: usize,
}

fn metric_rows(metrics: &PerformanceMetrics) -> Vec<MetricRow> {
    let mut rows = vec![
        MetricRow {
            name: "CPU",
            value: format_percent(metrics.system.cpu_usage),
        },
        MetricRow {
            name: "Memory",
            value: format!(
                "{} ({})",
                format_mb(metrics.system.memory_usage),
                format_percent(metrics.system.memory_percentage)
            ),
        },
        MetricRow {
            name: "Threads",
            value: metrics.system.thread_count.to_string(),
        },
        MetricRow {
            name: "Latency",
            value: format!("{:.1} ms", metrics.network.latency),
        },
        MetricRow {
            name: "Bandwidth",
            value: format_rate(metrics.network.bandwidth),
        },
        MetricRow {
            name: "Connection quality",
            value: format_percent(metrics.network.connection_quality),
        },
    ];
    if metrics.video.frame_rate > 0.0 {
        rows.push(MetricRow {
            name: "Frame rate",
            value: format!("{:.1} fps", metrics.video.frame_rate),
        });
    }
    rows
}

fn print_metric_table(metrics: &PerformanceMetrics) {
    let table = tabled::Table::new(metric_rows(metrics))
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
}

/// Show the agent's performance report
pub async fn show_report(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.report().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Performance Report".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Level:      {} (score {})",
                color_status(&report.level.to_string()),
                color_score(report.score)
            );
            println!("Strategy:   {}", report.strategy);
            println!(
                "Auto:       {}",
                if report.auto_optimization { "enabled" } else { "disabled" }
            );
            println!(
                "Generated:  {}",
                report.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            print_metric_table(&report.metrics);

            if !report.monitors.is_empty() {
                let rows: Vec<MonitorRow> = report
                    .monitors
                    .iter()
                    .map(|m| MonitorRow {
                        name: m.name.clone(),
                        status: color_status(&m.status.to_string()),
                        interval: format!("{} ms", m.tracking_interval_ms),
                        history: m.history_size,
                        errors: m.error_count,
                    })
                    .collect();
                println!();
                println!(
                    "{}",
                    tabled::Table::new(rows)
                        .with(tabled::settings::Style::rounded())
                        .to_string()
                );
            }

            let inactive: Vec<&str> = report
                .inactive_monitors()
                .map(|m| m.name.as_str())
                .collect();
            if !inactive.is_empty() {
                print_warning(&format!("Inactive monitors: {}", inactive.join(", ")));
            }
        }
    }

    Ok(())
}

/// Show the latest collected snapshot
pub async fn show_latest(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let metrics = client.latest_metrics().await?;

    match format {
        OutputFormat::Json => print_json(&metrics)?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                "Collected".bold(),
                metrics.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            print_metric_table(&metrics);
        }
    }

    Ok(())
}

/// Show an aggregate over a recent window
pub async fn show_aggregate(
    client: &ApiClient,
    window: &str,
    aggregation: &str,
    format: OutputFormat,
) -> Result<()> {
    let window_secs = parse_window(window)?;
    let kind: AggregationType = aggregation.parse().map_err(anyhow::Error::msg)?;
    let metrics = client.aggregate_metrics(window_secs, kind).await?;

    match format {
        OutputFormat::Json => print_json(&metrics)?,
        OutputFormat::Table => {
            println!("{} over the last {}", kind.to_string().bold(), window);
            print_metric_table(&metrics);
        }
    }

    Ok(())
}

/// Export history over a recent window, to a file or stdout
pub async fn export(
    client: &ApiClient,
    window: &str,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let window_secs = parse_window(window)?;
    let document = client.export(window_secs).await?;

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        print_success(&format!("Metrics exported to {}", path.display()));
        println!("Exported {} snapshots", document.metrics.len());
        return Ok(());
    }

    match format {
        OutputFormat::Json => print_json(&document)?,
        OutputFormat::Table => {
            println!("{}", "Metrics Export".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Period:     {} to {}",
                document.from.format("%Y-%m-%d %H:%M:%S"),
                document.to.format("%Y-%m-%d %H:%M:%S")
            );
            println!("Snapshots:  {}", document.metrics.len());
            println!("Custom:     {} series", document.custom_metrics.len());
            println!();
            print_info("Use --output <file> to save to a file");
            print_info("Use --format json to see full data");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use perf_lib::collector::ExportDocument;

    #[tokio::test]
    async fn test_export_writes_file() {
        let mut server = mockito::Server::new_async().await;
        let now = chrono::Utc::now();
        let document = ExportDocument::new(
            now - chrono::Duration::hours(1),
            now,
            vec![PerformanceMetrics::now()],
            Default::default(),
        );
        server
            .mock("GET", "/api/v1/export")
            .match_query(mockito::Matcher::UrlEncoded(
                "window_secs".into(),
                "3600".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&document).unwrap())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let client = ApiClient::new(&server.url()).unwrap();
        export(&client, "1h", Some(path.as_path()), OutputFormat::Table)
            .await
            .unwrap();

        let written: ExportDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_unknown_kind_before_request() {
        let client = ApiClient::new("http://127.0.0.1:9/").unwrap();
        let err = show_aggregate(&client, "1h", "median", OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown aggregation"));
    }

    #[test]
    fn test_frame_rate_row_only_with_video() {
        let mut metrics = PerformanceMetrics::now();
        assert_eq!(metric_rows(&metrics).len(), 6);
        metrics.video.frame_rate = 30.0;
        assert_eq!(metric_rows(&metrics).len(), 7);
    }
}
