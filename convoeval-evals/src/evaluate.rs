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

//! Batch evaluation of test cases against a set of metrics
//!
//! ```rust,ignore
//! let options = EvaluateOptions::default()
//!     .run_async(true)
//!     .ignore_errors(true);
//!
//! let results = evaluate(test_cases, vec![metric], options).await?;
//! println!("{}", results.summary);
//! ```

use crate::{CacheKey, EvalCache, EvalError, EvaluationResult, Metric, MetricResult, TestResult};
use convoeval_core::TestCase;
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Options for [`evaluate`]
#[derive(Clone)]
pub struct EvaluateOptions {
    /// Evaluate test cases and their metrics concurrently (default: true)
    pub run_async: bool,
    /// Record metric errors in the results instead of aborting (default: false)
    pub ignore_errors: bool,
    /// Maximum test cases in flight when `run_async` is set
    pub max_concurrent: usize,
    /// Shared result cache; `None` disables caching
    pub cache: Option<Arc<EvalCache>>,
    /// Log every metric result and the summary
    pub print_results: bool,
    /// Delay between test cases in sequential mode
    pub throttle: Option<Duration>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            run_async: true,
            ignore_errors: false,
            max_concurrent: 10,
            cache: None,
            print_results: true,
            throttle: None,
        }
    }
}

impl EvaluateOptions {
    pub fn run_async(mut self, enabled: bool) -> Self {
        self.run_async = enabled;
        self
    }

    pub fn ignore_errors(mut self, enabled: bool) -> Self {
        self.ignore_errors = enabled;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Enable caching with a fresh one-hour cache, or disable it
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(|| Arc::new(EvalCache::default()));
        self
    }

    /// Share `cache` across runs
    pub fn with_cache(mut self, cache: Arc<EvalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn print_results(mut self, enabled: bool) -> Self {
        self.print_results = enabled;
        self
    }

    pub fn throttle(mut self, delay: Duration) -> Self {
        self.throttle = Some(delay);
        self
    }
}

/// Measure every metric on every test case.
///
/// Results come back in the order of `test_cases` regardless of `run_async`.
pub async fn evaluate(
    test_cases: Vec<TestCase>,
    metrics: Vec<Arc<dyn Metric>>,
    options: EvaluateOptions,
) -> Result<EvaluationResult, EvalError> {
    if metrics.is_empty() {
        return Err(EvalError::InvalidInput("No metrics configured".to_string()));
    }

    let start = Instant::now();
    info!(
        test_cases = test_cases.len(),
        metrics = metrics.len(),
        run_async = options.run_async,
        "Evaluating test cases"
    );

    let test_results: Vec<TestResult> = if options.run_async {
        stream::iter(test_cases.iter().enumerate())
            .map(|(index, test_case)| evaluate_test_case(index, test_case, &metrics, &options))
            .buffered(options.max_concurrent.max(1))
            .try_collect()
            .await?
    } else {
        let mut results = Vec::with_capacity(test_cases.len());
        for (index, test_case) in test_cases.iter().enumerate() {
            if index > 0 {
                if let Some(delay) = options.throttle {
                    tokio::time::sleep(delay).await;
                }
            }
            results.push(evaluate_test_case(index, test_case, &metrics, &options).await?);
        }
        results
    };

    let mut result = EvaluationResult::new(test_results);
    result.summary.total_duration_ms = start.elapsed().as_millis() as u64;

    if options.print_results {
        info!("{}", result.summary);
    }

    Ok(result)
}

async fn evaluate_test_case(
    index: usize,
    test_case: &TestCase,
    metrics: &[Arc<dyn Metric>],
    options: &EvaluateOptions,
) -> Result<TestResult, EvalError> {
    let name = test_case
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("test_case_{}", index));

    let metrics_data: Vec<MetricResult> = if options.run_async {
        futures::future::join_all(
            metrics
                .iter()
                .map(|metric| measure(metric.as_ref(), test_case, options)),
        )
        .await
        .into_iter()
        .collect::<Result<_, _>>()?
    } else {
        let mut results = Vec::with_capacity(metrics.len());
        for metric in metrics {
            results.push(measure(metric.as_ref(), test_case, options).await?);
        }
        results
    };

    if options.print_results {
        for metric in &metrics_data {
            info!(
                test_case = %name,
                metric = %metric.name,
                score = metric.score,
                threshold = metric.threshold,
                success = metric.success,
                reason = metric.reason.as_deref().unwrap_or(""),
                error = metric.error.as_deref().unwrap_or(""),
                "Metric result"
            );
        }
    }

    Ok(TestResult {
        name,
        kind: test_case.kind(),
        success: metrics_data.iter().all(|m| m.success),
        metrics_data,
    })
}

async fn measure(
    metric: &dyn Metric,
    test_case: &TestCase,
    options: &EvaluateOptions,
) -> Result<MetricResult, EvalError> {
    let cached = match &options.cache {
        Some(cache) => {
            let key = CacheKey::new(test_case, metric);
            if let Some(hit) = cache.get(&key).await {
                debug!(metric = metric.name(), "Cache hit");
                return Ok(hit);
            }
            Some((cache, key))
        }
        None => None,
    };

    match metric.measure(test_case).await {
        Ok(result) => {
            if let Some((cache, key)) = cached {
                cache.set(key, result.clone()).await;
            }
            Ok(result)
        }
        Err(e) if options.ignore_errors => {
            warn!(metric = metric.name(), error = %e, "Metric failed, recording error");
            let mut result = MetricResult::errored(metric.name(), metric.threshold(), e.to_string());
            result.strict_mode = metric.strict_mode();
            result.evaluation_model = metric.evaluation_model();
            Ok(result)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convoeval_core::{ConversationalTestCase, LLMTestCase, TestCaseKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores 1.0 unless the output says "bad"; errors on input "boom".
    /// Earlier cases sleep longer so concurrent runs finish out of order.
    struct MockMetric {
        calls: AtomicUsize,
    }

    impl MockMetric {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Metric for MockMetric {
        fn name(&self) -> &str {
            "Mock"
        }

        fn threshold(&self) -> f64 {
            0.5
        }

        async fn measure(&self, test_case: &TestCase) -> Result<MetricResult, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let TestCase::Llm(tc) = test_case else {
                return Ok(MetricResult::new("Mock", 1.0, 0.5));
            };
            if tc.input == "boom" {
                return Err(EvalError::InvalidJudgeResponse("boom".to_string()));
            }

            let delay: u64 = tc.input.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let score = if tc.actual_output.as_deref() == Some("bad") {
                0.0
            } else {
                1.0
            };
            Ok(MetricResult::new("Mock", score, 0.5))
        }
    }

    fn case(input: &str, output: &str) -> TestCase {
        LLMTestCase::new(input).with_actual_output(output).into()
    }

    fn named(input: &str, output: &str, name: &str) -> TestCase {
        LLMTestCase::new(input)
            .with_actual_output(output)
            .with_name(name)
            .into()
    }

    fn metrics(metric: &Arc<MockMetric>) -> Vec<Arc<dyn Metric>> {
        vec![metric.clone() as Arc<dyn Metric>]
    }

    fn quiet() -> EvaluateOptions {
        EvaluateOptions::default().print_results(false)
    }

    #[tokio::test]
    async fn test_requires_metrics() {
        let err = evaluate(vec![case("1", "ok")], vec![], quiet())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_async_preserves_order() {
        let metric = MockMetric::new();
        let cases = vec![
            named("40", "ok", "slow"),
            named("20", "bad", "medium"),
            named("0", "ok", "fast"),
        ];

        let results = evaluate(cases, metrics(&metric), quiet()).await.unwrap();

        let names: Vec<&str> = results.test_results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
        assert!(!results.test_results[1].success);
        assert_eq!(results.summary.passed, 2);
        assert_eq!(results.summary.failed, 1);
        assert_eq!(metric.calls(), 3);
    }

    #[tokio::test]
    async fn test_sync_mode_with_throttle() {
        let metric = MockMetric::new();
        let options = quiet()
            .run_async(false)
            .throttle(Duration::from_millis(1));

        let results = evaluate(
            vec![case("0", "ok"), case("0", "ok")],
            metrics(&metric),
            options,
        )
        .await
        .unwrap();

        assert!(results.all_passed());
        assert_eq!(results.test_results[0].name, "test_case_0");
        assert_eq!(results.test_results[1].name, "test_case_1");
    }

    #[tokio::test]
    async fn test_error_aborts_without_ignore_errors() {
        let err = evaluate(
            vec![case("0", "ok"), case("boom", "ok")],
            metrics(&MockMetric::new()),
            quiet(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EvalError::InvalidJudgeResponse(_)));
    }

    #[tokio::test]
    async fn test_ignore_errors_records_failure() {
        let results = evaluate(
            vec![case("0", "ok"), case("boom", "ok")],
            metrics(&MockMetric::new()),
            quiet().ignore_errors(true),
        )
        .await
        .unwrap();

        let failed = &results.test_results[1];
        assert!(!failed.success);
        assert!(failed.metrics_data[0].is_error());
        assert_eq!(failed.metrics_data[0].score, 0.0);
        assert_eq!(results.summary.errored, 1);
        assert!(results.test_results[0].success);
    }

    #[tokio::test]
    async fn test_cache_reuses_results() {
        let metric = MockMetric::new();
        let cache = Arc::new(EvalCache::new(3600));
        let options = quiet().with_cache(cache.clone());

        for _ in 0..2 {
            evaluate(
                vec![case("0", "ok")],
                metrics(&metric),
                options.clone(),
            )
            .await
            .unwrap();
        }

        assert_eq!(metric.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_mixed_case_kinds() {
        let convo = ConversationalTestCase::new(vec![
            LLMTestCase::new("Message input").with_actual_output("Message actual output"),
        ])
        .unwrap()
        .with_chatbot_role("A programmer");

        let results = evaluate(
            vec![convo.into(), case("0", "ok")],
            metrics(&MockMetric::new()),
            quiet(),
        )
        .await
        .unwrap();

        assert_eq!(results.test_results[0].kind, TestCaseKind::Conversational);
        assert_eq!(results.test_results[1].kind, TestCaseKind::Llm);
    }
}
