//! Network latency measurement
//!
//! Latency is the TCP connect time to a small set of well-known resolvers.
//! Each attempt is bounded by a timeout so a sample never blocks the
//! monitor tick for long.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Public resolvers probed when latency measurement is enabled without explicit targets
pub const DEFAULT_LATENCY_TARGETS: &[&str] = &["8.8.8.8:53", "1.1.1.1:53", "208.67.222.222:53"];

/// Latency measurement settings
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// `host:port` targets; empty disables measurement
    pub targets: Vec<String>,
    /// Per-target connect timeout
    pub timeout: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            timeout: Duration::from_millis(300),
        }
    }
}

impl LatencyConfig {
    /// Measure against [`DEFAULT_LATENCY_TARGETS`]
    pub fn public_resolvers() -> Self {
        Self {
            targets: DEFAULT_LATENCY_TARGETS.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Mean connect time in milliseconds over the targets that answered.
/// Returns `None` when measurement is disabled or every target failed.
pub async fn measure_latency(config: &LatencyConfig) -> Option<f64> {
    let mut samples = Vec::with_capacity(config.targets.len());

    for target in &config.targets {
        let start = Instant::now();
        match timeout(config.timeout, TcpStream::connect(target.as_str())).await {
            Ok(Ok(_stream)) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => debug!(target = %target, error = %e, "Latency probe connect failed"),
            Err(_) => debug!(target = %target, "Latency probe timed out"),
        }
    }

    if samples.is_empty() {
        return None;
    }

    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_disabled_measurement_returns_none() {
        assert!(measure_latency(&LatencyConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_measures_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let config = LatencyConfig {
            targets: vec![addr.to_string()],
            timeout: Duration::from_secs(2),
        };
        let latency = measure_latency(&config).await.unwrap();
        assert!(latency >= 0.0);
    }
}
