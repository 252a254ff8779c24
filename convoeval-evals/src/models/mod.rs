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

//! Judge model abstraction for LLM-as-judge metrics

use async_openai::error::OpenAIError;
use async_trait::async_trait;
use convoeval_core::KeyValues;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

mod gpt;

pub use gpt::{ChatBackend, GptModel, DEFAULT_GPT_MODEL, VALID_GPT_MODELS};

/// Trait for models that judge test case outputs
#[async_trait]
pub trait JudgeModel: Send + Sync {
    /// Name shown in metric results
    fn model_name(&self) -> String;

    /// Send a prompt and wait for the completion
    async fn a_generate(&self, prompt: &str) -> Result<ModelResponse, ModelError>;

    /// Blocking variant of [`JudgeModel::a_generate`].
    ///
    /// Runs on a fresh current-thread runtime, so it must not be called from
    /// inside an async context.
    fn generate(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        block_on(self.a_generate(prompt))?
    }

    /// Cost per token (input, output) in USD
    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

/// Drive `future` to completion on a dedicated current-thread runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, ModelError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

/// Text response from a judge model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl ModelResponse {
    /// Parse the response as JSON, ignoring any prose or markdown fences
    /// around the outermost object.
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(trimmed_json(&self.content))
    }

    /// Deserialize the response into `T` (see [`ModelResponse::as_json`]).
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(trimmed_json(&self.content))
    }

    /// Cost of this call at the given per-token prices
    pub fn cost(&self, (input, output): (f64, f64)) -> f64 {
        self.usage.calculate_cost(input, output)
    }
}

/// Slice `text` down to its outermost `{ ... }` block.
///
/// Judges often wrap JSON in a ```json fence or add a sentence before it.
pub fn trimmed_json(text: &str) -> &str {
    let trimmed = text.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Calculate cost based on per-token pricing
    pub fn calculate_cost(&self, cost_per_input: f64, cost_per_output: f64) -> f64 {
        (self.prompt_tokens as f64 * cost_per_input)
            + (self.completion_tokens as f64 * cost_per_output)
    }
}

/// Request parameters bound to every call a model makes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u16>,
    pub seed: Option<i64>,
}

impl GenerateOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u16) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Errors from judge models
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid model. Available GPT models: {available}")]
    InvalidModel { model: String, available: String },

    #[error("Missing configuration value: {0}")]
    MissingConfig(KeyValues),

    #[error("API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ModelError {
    /// Whether retrying the call may succeed
    pub fn is_rate_limit(&self) -> bool {
        match self {
            ModelError::Api(e) => is_rate_limit(e),
            _ => false,
        }
    }
}

pub(crate) fn is_rate_limit(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::ApiError(api) => {
            api.r#type
                .as_deref()
                .is_some_and(|t| t.contains("rate_limit") || t == "requests" || t == "tokens")
                || api.message.to_lowercase().contains("rate limit")
        }
        _ => false,
    }
}
