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

//! Conversation relevancy using LLM-as-judge
//!
//! Every turn is judged against a sliding window of the turns before it.
//! The score is the fraction of turns whose output the judge did not find
//! irrelevant.

mod template;

pub use template::ConversationRelevancyTemplate;

use crate::{
    models::{JudgeModel, ModelResponse},
    EvalError, Metric, MetricResult,
};
use async_trait::async_trait;
use convoeval_core::{
    check_llm_test_case_params, ConversationalTestCase, LLMTestCase, LLMTestCaseParams, TestCase,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const METRIC_NAME: &str = "Conversation Relevancy";

const REQUIRED_PARAMS: [LLMTestCaseParams; 2] =
    [LLMTestCaseParams::Input, LLMTestCaseParams::ActualOutput];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Yes,
    No,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Yes => f.write_str("yes"),
            Verdict::No => f.write_str("no"),
        }
    }
}

/// Judge output for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancyVerdict {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wire shape of the judge's verdict; the verdict string is matched
/// case-insensitively.
#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RawReason {
    reason: String,
}

/// One turn as shown to the judge
#[derive(Serialize)]
struct WindowMessage<'a> {
    input: &'a str,
    actual_output: &'a str,
}

/// Conversation relevancy metric
///
/// Returns a score in [0, 1] where 1.0 means every turn was relevant.
pub struct ConversationRelevancyMetric {
    model: Arc<dyn JudgeModel>,
    threshold: f64,
    window_size: usize,
    include_reason: bool,
    strict_mode: bool,
    async_mode: bool,
    verbose_mode: bool,
}

impl ConversationRelevancyMetric {
    pub fn new(model: Arc<dyn JudgeModel>) -> Self {
        Self {
            model,
            threshold: 0.5,
            window_size: 3,
            include_reason: true,
            strict_mode: false,
            async_mode: true,
            verbose_mode: false,
        }
    }

    /// Set threshold for pass/fail (default: 0.5)
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of turns shown to the judge, including the judged one
    /// (default: 3, minimum: 1)
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_include_reason(mut self, include_reason: bool) -> Self {
        self.include_reason = include_reason;
        self
    }

    /// Strict mode requires a perfect score; anything less scores 0.
    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    /// Judge turns concurrently (default: true)
    pub fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_verbose_mode(mut self, verbose_mode: bool) -> Self {
        self.verbose_mode = verbose_mode;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Turns shown to the judge for each turn, in conversation order.
    pub fn sliding_windows<'a>(&self, turns: &'a [LLMTestCase]) -> Vec<&'a [LLMTestCase]> {
        (0..turns.len())
            .map(|i| {
                let start = (i + 1).saturating_sub(self.window_size);
                &turns[start..=i]
            })
            .collect()
    }

    fn render_window(window: &[LLMTestCase]) -> Result<String, EvalError> {
        let messages: Vec<WindowMessage<'_>> = window
            .iter()
            .map(|turn| WindowMessage {
                input: &turn.input,
                actual_output: turn.actual_output.as_deref().unwrap_or_default(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&messages)?)
    }

    async fn generate_verdict(
        &self,
        window: &[LLMTestCase],
    ) -> Result<(RelevancyVerdict, f64), EvalError> {
        let prompt = ConversationRelevancyTemplate::generate_verdicts(&Self::render_window(window)?);
        let response = self.model.a_generate(&prompt).await?;
        let cost = response.cost(self.model.cost_per_token());

        Ok((parse_verdict(&response)?, cost))
    }

    async fn generate_verdicts(
        &self,
        windows: &[&[LLMTestCase]],
    ) -> Result<Vec<(RelevancyVerdict, f64)>, EvalError> {
        if self.async_mode {
            futures::future::try_join_all(windows.iter().map(|w| self.generate_verdict(w))).await
        } else {
            let mut verdicts = Vec::with_capacity(windows.len());
            for window in windows {
                verdicts.push(self.generate_verdict(window).await?);
            }
            Ok(verdicts)
        }
    }

    async fn generate_reason(
        &self,
        score: f64,
        verdicts: &[RelevancyVerdict],
    ) -> Result<(String, f64), EvalError> {
        let irrelevancies: Vec<String> = verdicts
            .iter()
            .filter(|v| v.verdict == Verdict::No)
            .filter_map(|v| v.reason.clone())
            .collect();

        let prompt = ConversationRelevancyTemplate::generate_reason(score, &irrelevancies);
        let response = self.model.a_generate(&prompt).await?;
        let cost = response.cost(self.model.cost_per_token());

        let parsed: RawReason = response.parse().map_err(|e| {
            EvalError::InvalidJudgeResponse(format!("Failed to parse reason JSON: {}", e))
        })?;
        Ok((parsed.reason, cost))
    }

    fn calculate_score(&self, verdicts: &[RelevancyVerdict]) -> f64 {
        if verdicts.is_empty() {
            return 1.0;
        }

        let relevant = verdicts
            .iter()
            .filter(|v| v.verdict != Verdict::No)
            .count();
        let score = relevant as f64 / verdicts.len() as f64;

        if self.strict_mode && score < self.threshold() {
            0.0
        } else {
            score
        }
    }

    fn conversation<'a>(
        &self,
        test_case: &'a TestCase,
    ) -> Result<&'a ConversationalTestCase, EvalError> {
        match test_case {
            TestCase::Conversational(convo) => Ok(convo),
            TestCase::Llm(_) => Err(EvalError::InvalidInput(format!(
                "'{}' requires a conversational test case",
                METRIC_NAME
            ))),
        }
    }
}

fn parse_verdict(response: &ModelResponse) -> Result<RelevancyVerdict, EvalError> {
    let raw: RawVerdict = response.parse().map_err(|e| {
        EvalError::InvalidJudgeResponse(format!("Failed to parse verdict JSON: {}", e))
    })?;

    let verdict = match raw.verdict.trim().to_ascii_lowercase().as_str() {
        "yes" => Verdict::Yes,
        "no" => Verdict::No,
        other => {
            return Err(EvalError::InvalidJudgeResponse(format!(
                "Verdict must be 'yes' or 'no', got '{}'",
                other
            )))
        }
    };

    Ok(RelevancyVerdict {
        verdict,
        reason: raw.reason.filter(|r| !r.trim().is_empty()),
    })
}

#[async_trait]
impl Metric for ConversationRelevancyMetric {
    fn name(&self) -> &str {
        METRIC_NAME
    }

    fn threshold(&self) -> f64 {
        if self.strict_mode {
            1.0
        } else {
            self.threshold
        }
    }

    fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    fn evaluation_model(&self) -> Option<String> {
        Some(self.model.model_name())
    }

    fn cache_id(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            METRIC_NAME,
            self.threshold(),
            self.strict_mode,
            self.window_size,
            self.include_reason,
            self.verbose_mode,
            self.model.model_name()
        )
    }

    async fn measure(&self, test_case: &TestCase) -> Result<MetricResult, EvalError> {
        let start = Instant::now();
        let convo = self.conversation(test_case)?;

        for turn in &convo.turns {
            check_llm_test_case_params(turn, &REQUIRED_PARAMS, METRIC_NAME)?;
        }

        let windows = self.sliding_windows(&convo.turns);
        debug!(
            turns = convo.turns.len(),
            window_size = self.window_size,
            "Judging conversation relevancy"
        );

        let (verdicts, costs): (Vec<RelevancyVerdict>, Vec<f64>) =
            self.generate_verdicts(&windows).await?.into_iter().unzip();
        let mut total_cost: f64 = costs.iter().sum();

        let score = self.calculate_score(&verdicts);

        let reason = if self.include_reason {
            let (reason, cost) = self.generate_reason(score, &verdicts).await?;
            total_cost += cost;
            Some(reason)
        } else {
            None
        };

        let verbose_logs = if self.verbose_mode {
            Some(format!(
                "Verdicts:\n{}\n\nScore: {}\nReason: {}",
                serde_json::to_string_pretty(&verdicts)?,
                score,
                reason.as_deref().unwrap_or("None")
            ))
        } else {
            None
        };

        let mut result = MetricResult::new(METRIC_NAME, score, self.threshold());
        result.reason = reason;
        result.strict_mode = self.strict_mode;
        result.evaluation_model = Some(self.model.model_name());
        result.evaluation_cost = Some(total_cost);
        result.duration_ms = Some(start.elapsed().as_millis() as u64);
        result.verbose_logs = verbose_logs;

        Ok(result)
    }
}
