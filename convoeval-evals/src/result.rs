// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metric and test run results

use convoeval_core::TestCaseKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one metric on one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Name of the metric that produced this result
    pub name: String,

    /// Score in [0, 1]
    pub score: f64,

    pub threshold: f64,

    /// Whether the score reached the threshold
    pub success: bool,

    /// Judge-written justification of the score
    pub reason: Option<String>,

    pub strict_mode: bool,

    /// Display name of the judge model
    pub evaluation_model: Option<String>,

    /// Judge cost in USD
    pub evaluation_cost: Option<f64>,

    pub duration_ms: Option<u64>,

    /// Intermediate steps (verdicts etc.), filled in verbose mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_logs: Option<String>,

    /// Set when the metric failed and errors were ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricResult {
    pub fn new(name: impl Into<String>, score: f64, threshold: f64) -> Self {
        Self {
            name: name.into(),
            score,
            threshold,
            success: score >= threshold,
            reason: None,
            strict_mode: false,
            evaluation_model: None,
            evaluation_cost: None,
            duration_ms: None,
            verbose_logs: None,
            error: None,
        }
    }

    /// Result recorded in place of a metric that raised an error
    pub fn errored(name: impl Into<String>, threshold: f64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(name, 0.0, threshold)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// All metric results for one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub kind: TestCaseKind,
    pub success: bool,
    pub metrics_data: Vec<MetricResult>,
}

/// Results of an `evaluate` run, in test case order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub test_results: Vec<TestResult>,
    pub summary: EvaluationSummary,
}

impl EvaluationResult {
    pub fn new(test_results: Vec<TestResult>) -> Self {
        let summary = EvaluationSummary::from_results(&test_results);
        Self {
            test_results,
            summary,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.test_results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> Vec<&TestResult> {
        self.test_results.iter().filter(|r| !r.success).collect()
    }
}

/// Summary statistics for an evaluation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Metric results that carry an error
    pub errored: usize,
    pub total_cost: f64,
    pub total_duration_ms: u64,
}

impl EvaluationSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let metrics = results.iter().flat_map(|r| r.metrics_data.iter());
        let mut summary = Self {
            total: results.len(),
            passed: results.iter().filter(|r| r.success).count(),
            ..Default::default()
        };
        summary.failed = summary.total - summary.passed;

        for m in metrics {
            if m.is_error() {
                summary.errored += 1;
            }
            summary.total_cost += m.evaluation_cost.unwrap_or(0.0);
            summary.total_duration_ms += m.duration_ms.unwrap_or(0);
        }
        summary
    }
}

impl fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test cases: {}/{} passed, {} errored metrics, ${:.4} cost, {}ms total",
            self.passed, self.total, self.errored, self.total_cost, self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_result_success() {
        assert!(MetricResult::new("m", 0.5, 0.5).success);
        assert!(!MetricResult::new("m", 0.49, 0.5).success);

        let errored = MetricResult::errored("m", 0.5, "boom");
        assert!(!errored.success);
        assert!(errored.is_error());
    }

    #[test]
    fn test_summary() {
        let mut ok = MetricResult::new("m", 1.0, 0.5);
        ok.evaluation_cost = Some(0.01);
        ok.duration_ms = Some(10);

        let results = vec![
            TestResult {
                name: "a".to_string(),
                kind: TestCaseKind::Conversational,
                success: true,
                metrics_data: vec![ok],
            },
            TestResult {
                name: "b".to_string(),
                kind: TestCaseKind::Llm,
                success: false,
                metrics_data: vec![MetricResult::errored("m", 0.5, "boom")],
            },
        ];

        let result = EvaluationResult::new(results);
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.passed, 1);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.errored, 1);
        assert_eq!(result.summary.total_duration_ms, 10);
        assert!(!result.all_passed());
        assert_eq!(result.failures().len(), 1);
        assert_eq!(
            result.summary.to_string(),
            "Test cases: 1/2 passed, 1 errored metrics, $0.0100 cost, 10ms total"
        );
    }
}
