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

//! # ConvoEval Evaluation Framework
//!
//! LLM-as-judge evaluation of single-turn and conversational test cases.
//!
//! ## Features
//!
//! - **Judge models**: [`models::GptModel`] over OpenAI or Azure OpenAI
//! - **Conversation relevancy**: sliding-window per-turn verdicts aggregated
//!   into a score with a generated justification
//! - **Batch evaluation**: sequential or concurrent runs via [`evaluate()`]
//! - **Result caching**: reuse metric results across runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use convoeval_core::{ConversationalTestCase, KeyFileHandler, LLMTestCase};
//! use convoeval_evals::{evaluate, EvaluateOptions, ConversationRelevancyMetric, GptModel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let model = Arc::new(GptModel::new(Some("gpt-4"), Arc::new(KeyFileHandler::default()))?);
//!     let metric = Arc::new(ConversationRelevancyMetric::new(model));
//!
//!     let convo = ConversationalTestCase::new(vec![
//!         LLMTestCase::new("Hi!").with_actual_output("Hello, how can I help?"),
//!     ])?;
//!
//!     let results = evaluate(vec![convo.into()], vec![metric], EvaluateOptions::default()).await?;
//!     println!("{}", results.summary);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use convoeval_core::{CoreError, TestCase};
use thiserror::Error;

pub mod cache;
pub mod evaluate;
pub mod metrics;
pub mod models;
pub mod result;

pub use cache::{CacheKey, CacheStats, EvalCache};
pub use evaluate::{evaluate, EvaluateOptions};
pub use metrics::{
    ConversationRelevancyMetric, ConversationRelevancyTemplate, RelevancyVerdict, Verdict,
};
pub use models::{GenerateOptions, GptModel, JudgeModel, ModelError, ModelResponse, TokenUsage};
pub use result::{EvaluationResult, EvaluationSummary, MetricResult, TestResult};

/// Core trait that all metrics must implement
#[async_trait]
pub trait Metric: Send + Sync {
    /// Human-readable metric name (e.g., "Conversation Relevancy")
    fn name(&self) -> &str;

    /// Minimum passing score
    fn threshold(&self) -> f64;

    fn strict_mode(&self) -> bool {
        false
    }

    /// Name of the judge model, if any
    fn evaluation_model(&self) -> Option<String> {
        None
    }

    /// Identity used for result caching; two metrics with the same id must
    /// produce interchangeable results.
    fn cache_id(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.name(),
            self.threshold(),
            self.strict_mode(),
            self.evaluation_model().unwrap_or_default()
        )
    }

    /// Score a single test case
    async fn measure(&self, test_case: &TestCase) -> Result<MetricResult, EvalError>;
}

/// Errors that can occur during evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Judge model error: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid judge response: {0}")]
    InvalidJudgeResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
