//! Performance scoring and policy
//!
//! The score starts at 100 and loses points per banded metric. Within one
//! metric only the worst crossed band applies.

use crate::config::ThresholdConfig;
use crate::models::{OptimizationStrategy, PerformanceLevel, PerformanceMetrics, ResourceType};

/// (limit, penalty) pairs, worst band first; penalized when the value is above the limit
const CPU_BANDS: &[(f64, i32)] = &[(80.0, 25), (60.0, 15), (40.0, 5)];
/// MB, decimal thousands
const MEMORY_BANDS: &[(f64, i32)] = &[(8000.0, 20), (4000.0, 10), (2000.0, 5)];
const LATENCY_BANDS: &[(f64, i32)] = &[(200.0, 25), (100.0, 15), (50.0, 5)];
/// Penalized when the frame rate is below the limit
const FRAME_RATE_BANDS: &[(f64, i32)] = &[(15.0, 30), (24.0, 20), (30.0, 10)];

fn penalty_above(value: f64, bands: &[(f64, i32)]) -> i32 {
    bands
        .iter()
        .find(|(limit, _)| value > *limit)
        .map(|(_, penalty)| *penalty)
        .unwrap_or(0)
}

fn penalty_below(value: f64, bands: &[(f64, i32)]) -> i32 {
    bands
        .iter()
        .find(|(limit, _)| value < *limit)
        .map(|(_, penalty)| *penalty)
        .unwrap_or(0)
}

/// Aggregate score in 0..=100. A frame rate of zero counts as stalled video.
pub fn performance_score(metrics: &PerformanceMetrics) -> u32 {
    let mut score = 100;
    score -= penalty_above(metrics.system.cpu_usage, CPU_BANDS);
    score -= penalty_above(metrics.system.memory_usage, MEMORY_BANDS);
    score -= penalty_above(metrics.network.latency, LATENCY_BANDS);
    score -= penalty_below(metrics.video.frame_rate, FRAME_RATE_BANDS);
    score.max(0) as u32
}

pub fn level_for_score(score: u32) -> PerformanceLevel {
    if score >= 90 {
        PerformanceLevel::Excellent
    } else if score >= 75 {
        PerformanceLevel::Good
    } else if score >= 60 {
        PerformanceLevel::Fair
    } else if score >= 40 {
        PerformanceLevel::Poor
    } else {
        PerformanceLevel::Critical
    }
}

/// Whether `level` is bad enough for auto-optimization under `strategy`
pub fn should_auto_optimize(strategy: OptimizationStrategy, level: PerformanceLevel) -> bool {
    match strategy {
        OptimizationStrategy::Conservative => level == PerformanceLevel::Critical,
        OptimizationStrategy::Balanced => level <= PerformanceLevel::Poor,
        OptimizationStrategy::Aggressive => level <= PerformanceLevel::Fair,
    }
}

/// One metric over (or, for frame rate, under) its configured limit
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub metric: &'static str,
    pub resource: Option<ResourceType>,
    pub value: f64,
    pub threshold: f64,
}

/// Compare a snapshot against the configured limits. A limit of zero is
/// disabled.
pub fn check_thresholds(metrics: &PerformanceMetrics, limits: &ThresholdConfig) -> Vec<ThresholdBreach> {
    let mut breaches = Vec::new();
    let mut above = |metric: &'static str, resource: Option<ResourceType>, value: f64, threshold: f64| {
        if threshold > 0.0 && value > threshold {
            breaches.push(ThresholdBreach {
                metric,
                resource,
                value,
                threshold,
            });
        }
    };

    above(
        "cpu_usage",
        Some(ResourceType::Cpu),
        metrics.system.cpu_usage,
        limits.cpu_percent,
    );
    above(
        "memory_usage",
        Some(ResourceType::Memory),
        metrics.system.memory_usage,
        limits.memory_mb,
    );
    above(
        "network_latency",
        Some(ResourceType::Network),
        metrics.network.latency,
        limits.network_latency_ms,
    );

    let fps = metrics.video.frame_rate;
    if limits.frame_rate_fps > 0.0 && fps < limits.frame_rate_fps {
        breaches.push(ThresholdBreach {
            metric: "frame_rate",
            resource: None,
            value: fps,
            threshold: limits.frame_rate_fps,
        });
    }
    breaches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(cpu: f64, memory_mb: f64, latency: f64, fps: f64) -> PerformanceMetrics {
        let mut m = PerformanceMetrics::now();
        m.system.cpu_usage = cpu;
        m.system.memory_usage = memory_mb;
        m.network.latency = latency;
        m.video.frame_rate = fps;
        m
    }

    #[test]
    fn test_healthy_snapshot_scores_full() {
        let score = performance_score(&metrics(35.0, 1500.0, 40.0, 32.0));
        assert_eq!(score, 100);
        assert_eq!(level_for_score(score), PerformanceLevel::Excellent);
    }

    #[test]
    fn test_worst_bands_floor_at_zero() {
        let score = performance_score(&metrics(85.0, 9000.0, 250.0, 12.0));
        assert_eq!(score, 0);
        let level = level_for_score(score);
        assert_eq!(level, PerformanceLevel::Critical);
        for strategy in [
            OptimizationStrategy::Conservative,
            OptimizationStrategy::Balanced,
            OptimizationStrategy::Aggressive,
        ] {
            assert!(should_auto_optimize(strategy, level));
        }
    }

    #[test]
    fn test_score_never_improves_as_a_metric_worsens() {
        let cpu: Vec<u32> = [30.0, 45.0, 65.0, 85.0]
            .iter()
            .map(|c| performance_score(&metrics(*c, 1000.0, 10.0, 60.0)))
            .collect();
        assert_eq!(cpu, vec![100, 95, 85, 75]);

        let fps: Vec<u32> = [60.0, 28.0, 20.0, 10.0]
            .iter()
            .map(|f| performance_score(&metrics(10.0, 1000.0, 10.0, *f)))
            .collect();
        assert_eq!(fps, vec![100, 90, 80, 70]);
        assert!(fps.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_stalled_video_is_penalized() {
        let stalled = metrics(10.0, 100.0, 0.0, 0.0);
        assert_eq!(performance_score(&stalled), 70);

        let breaches = check_thresholds(&stalled, &ThresholdConfig::default());
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].metric, "frame_rate");
        assert_eq!(breaches[0].value, 0.0);
    }

    #[test]
    fn test_memory_bands_use_decimal_thousands() {
        assert_eq!(performance_score(&metrics(10.0, 8100.0, 10.0, 60.0)), 80);
        assert_eq!(performance_score(&metrics(10.0, 8000.0, 10.0, 60.0)), 90);
        assert_eq!(performance_score(&metrics(10.0, 4100.0, 10.0, 60.0)), 90);
        assert_eq!(performance_score(&metrics(10.0, 2100.0, 10.0, 60.0)), 95);
        assert_eq!(performance_score(&metrics(10.0, 2000.0, 10.0, 60.0)), 100);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(level_for_score(90), PerformanceLevel::Excellent);
        assert_eq!(level_for_score(89), PerformanceLevel::Good);
        assert_eq!(level_for_score(75), PerformanceLevel::Good);
        assert_eq!(level_for_score(60), PerformanceLevel::Fair);
        assert_eq!(level_for_score(40), PerformanceLevel::Poor);
        assert_eq!(level_for_score(39), PerformanceLevel::Critical);
    }

    #[test]
    fn test_strategy_gating() {
        use OptimizationStrategy::*;
        use PerformanceLevel::*;
        assert!(!should_auto_optimize(Conservative, Poor));
        assert!(should_auto_optimize(Balanced, Poor));
        assert!(!should_auto_optimize(Balanced, Fair));
        assert!(should_auto_optimize(Aggressive, Fair));
        assert!(!should_auto_optimize(Aggressive, Good));
    }

    #[test]
    fn test_threshold_checks() {
        let limits = ThresholdConfig::default();
        let breaches = check_thresholds(&metrics(85.0, 5000.0, 50.0, 20.0), &limits);
        let names: Vec<_> = breaches.iter().map(|b| b.metric).collect();
        assert_eq!(names, vec!["cpu_usage", "memory_usage", "frame_rate"]);
        assert_eq!(breaches[2].threshold, 24.0);

        let disabled = ThresholdConfig {
            cpu_percent: 0.0,
            frame_rate_fps: 0.0,
            ..Default::default()
        };
        assert!(check_thresholds(&metrics(99.0, 0.0, 0.0, 0.0), &disabled).is_empty());
    }
}
