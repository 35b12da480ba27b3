//! Outcome of one optimization run

use crate::models::OptimizationStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque key-value snapshot captured before and after a run
pub type MetricSnapshot = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
    Partial,
    NotNeeded,
    NotSupported,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Partial => "partial",
            ResultStatus::NotNeeded => "not_needed",
            ResultStatus::NotSupported => "not_supported",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub status: ResultStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Strategy the run was requested with, absent for rejected runs
    pub strategy: Option<OptimizationStrategy>,
    pub execution_time_ms: u64,
    pub improvement_percentage: f64,
    pub before_metrics: MetricSnapshot,
    pub after_metrics: MetricSnapshot,
    /// Named deltas, positive is better
    pub improvements: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl OptimizationResult {
    pub fn new(status: ResultStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: Utc::now(),
            strategy: None,
            execution_time_ms: 0,
            improvement_percentage: 0.0,
            before_metrics: MetricSnapshot::new(),
            after_metrics: MetricSnapshot::new(),
            improvements: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Failed result carrying the message as its only error
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::new(ResultStatus::Failed, message.clone());
        result.errors.push(message);
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == ResultStatus::Failed
    }

    pub fn is_partial(&self) -> bool {
        self.status == ResultStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates_are_exclusive() {
        for status in [
            ResultStatus::Success,
            ResultStatus::Failed,
            ResultStatus::Partial,
            ResultStatus::NotNeeded,
            ResultStatus::NotSupported,
        ] {
            let result = OptimizationResult::new(status, "x");
            let flags = [result.is_success(), result.is_failed(), result.is_partial()];
            assert!(flags.iter().filter(|f| **f).count() <= 1);
            assert_eq!(result.is_success(), status == ResultStatus::Success);
            assert_eq!(result.is_failed(), status == ResultStatus::Failed);
            assert_eq!(result.is_partial(), status == ResultStatus::Partial);
        }
    }

    #[test]
    fn test_failed_records_error() {
        let result = OptimizationResult::failed("Optimizer is disabled");
        assert!(result.is_failed());
        assert_eq!(result.errors, vec!["Optimizer is disabled".to_string()]);
        assert_eq!(result.status.as_str(), "failed");
    }
}
