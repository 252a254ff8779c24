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

//! GPT judge model backed by OpenAI or Azure OpenAI

use super::{block_on, is_rate_limit, GenerateOptions, JudgeModel, ModelError, ModelResponse, TokenUsage};
use async_openai::{
    config::{AzureConfig, OpenAIConfig},
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use convoeval_core::{retry_with_exponential_backoff, KeyStore, KeyValues, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model names accepted by [`GptModel::new`]
pub const VALID_GPT_MODELS: &[&str] = &[
    "gpt-4-turbo-preview",
    "gpt-4-0125-preview",
    "gpt-4-1106-preview",
    "gpt-4",
    "gpt-4-32k",
    "gpt-4-0613",
    "gpt-4-32k-0613",
    "gpt-3.5-turbo-1106",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo-0125",
];

pub const DEFAULT_GPT_MODEL: &str = "gpt-4-0125-preview";

const AZURE_DISPLAY_NAME: &str = "azure openai";

/// Client-side backoff that gives up after the first failure, leaving
/// retries to the model's [`RetryPolicy`].
fn no_client_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..Default::default()
    }
}

/// Chat client resolved from the current configuration
pub enum ChatBackend {
    OpenAi(Client<OpenAIConfig>),
    Azure {
        client: Client<AzureConfig>,
        deployment: String,
        model_version: String,
    },
}

impl ChatBackend {
    async fn create(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, OpenAIError> {
        match self {
            ChatBackend::OpenAi(client) => client.chat().create(request).await,
            ChatBackend::Azure { client, .. } => client.chat().create(request).await,
        }
    }

    pub fn is_azure(&self) -> bool {
        matches!(self, ChatBackend::Azure { .. })
    }
}

/// GPT judge model
///
/// The backend is chosen on every call: when `USE_AZURE_OPENAI` is `yes` in
/// the key store, requests go to the configured Azure deployment, otherwise
/// to OpenAI with `OPENAI_API_KEY` from the environment.
pub struct GptModel {
    model_name: String,
    keys: Arc<dyn KeyStore>,
    options: GenerateOptions,
    retry_policy: RetryPolicy,
    api_base: Option<String>,
    api_key: Option<String>,
}

impl GptModel {
    /// Create a model, defaulting to [`DEFAULT_GPT_MODEL`].
    ///
    /// Fails with [`ModelError::InvalidModel`] for names outside
    /// [`VALID_GPT_MODELS`].
    pub fn new(model: Option<&str>, keys: Arc<dyn KeyStore>) -> Result<Self, ModelError> {
        let model_name = match model {
            Some(name) if VALID_GPT_MODELS.contains(&name) => name.to_string(),
            Some(name) => {
                return Err(ModelError::InvalidModel {
                    model: name.to_string(),
                    available: VALID_GPT_MODELS.join(", "),
                })
            }
            None => DEFAULT_GPT_MODEL.to_string(),
        };

        Ok(Self {
            model_name,
            keys,
            options: GenerateOptions::default(),
            retry_policy: RetryPolicy::exponential(),
            api_base: None,
            api_key: None,
        })
    }

    /// Bind request parameters used by every call
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the OpenAI API base URL (ignored for Azure)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Use this key instead of `OPENAI_API_KEY` (ignored for Azure)
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// The validated model name, regardless of backend
    pub fn resolved_model(&self) -> &str {
        &self.model_name
    }

    pub fn should_use_azure_openai(&self) -> bool {
        self.keys
            .fetch_data(KeyValues::UseAzureOpenAI)
            .is_some_and(|value| value.eq_ignore_ascii_case("yes"))
    }

    /// Display name: `"azure openai"` when Azure is enabled
    pub fn get_model_name(&self) -> String {
        if self.should_use_azure_openai() {
            AZURE_DISPLAY_NAME.to_string()
        } else {
            self.model_name.clone()
        }
    }

    fn require(&self, key: KeyValues) -> Result<String, ModelError> {
        self.keys
            .fetch_data(key)
            .ok_or(ModelError::MissingConfig(key))
    }

    /// Build the chat client for the current configuration
    pub fn load_model(&self) -> Result<ChatBackend, ModelError> {
        if self.should_use_azure_openai() {
            let api_key = self.require(KeyValues::AzureOpenAIApiKey)?;
            let api_version = self.require(KeyValues::OpenAIApiVersion)?;
            let deployment = self.require(KeyValues::AzureDeploymentName)?;
            let endpoint = self.require(KeyValues::AzureOpenAIEndpoint)?;
            let model_version = self
                .keys
                .fetch_data(KeyValues::AzureModelVersion)
                .unwrap_or_default();

            let config = AzureConfig::new()
                .with_api_base(endpoint)
                .with_api_version(api_version)
                .with_deployment_id(deployment.clone())
                .with_api_key(api_key);

            return Ok(ChatBackend::Azure {
                client: Client::with_config(config).with_backoff(no_client_backoff()),
                deployment,
                model_version,
            });
        }

        let mut config = OpenAIConfig::new();
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base.clone());
        }
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        Ok(ChatBackend::OpenAi(
            Client::with_config(config).with_backoff(no_client_backoff()),
        ))
    }

    fn build_request(&self, prompt: &str) -> Result<CreateChatCompletionRequest, ModelError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model_name.clone())
            .messages(vec![ChatCompletionRequestMessage::User(message)]);

        if let Some(temperature) = self.options.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            args.max_tokens(max_tokens);
        }
        if let Some(seed) = self.options.seed {
            args.seed(seed);
        }

        Ok(args.build()?)
    }

    /// Send `prompt` and return the raw chat completion
    pub async fn a_generate_raw(
        &self,
        prompt: &str,
    ) -> Result<CreateChatCompletionResponse, ModelError> {
        let backend = self.load_model()?;
        let request = self.build_request(prompt)?;

        if let ChatBackend::Azure {
            deployment,
            model_version,
            ..
        } = &backend
        {
            debug!(deployment = %deployment, model_version = %model_version, "Calling Azure OpenAI");
        } else {
            debug!(model = %self.model_name, "Calling OpenAI");
        }

        let response = retry_with_exponential_backoff(&self.retry_policy, is_rate_limit, || {
            backend.create(request.clone())
        })
        .await?;

        Ok(response)
    }

    /// Blocking variant of [`GptModel::a_generate_raw`]
    pub fn generate_raw(&self, prompt: &str) -> Result<CreateChatCompletionResponse, ModelError> {
        block_on(self.a_generate_raw(prompt))?
    }

    fn to_model_response(&self, raw: CreateChatCompletionResponse) -> Result<ModelResponse, ModelError> {
        let content = raw
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ModelError::InvalidResponse("Missing content".to_string()))?;

        let usage = raw
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            content,
            usage,
            model: raw.model,
        })
    }
}

#[async_trait]
impl JudgeModel for GptModel {
    fn model_name(&self) -> String {
        self.get_model_name()
    }

    async fn a_generate(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        let raw = self.a_generate_raw(prompt).await?;
        self.to_model_response(raw)
    }

    fn cost_per_token(&self) -> (f64, f64) {
        match self.model_name.as_str() {
            "gpt-4" | "gpt-4-0613" => (0.00003, 0.00006),
            "gpt-4-32k" | "gpt-4-32k-0613" => (0.00006, 0.00012),
            "gpt-3.5-turbo-1106" => (0.000001, 0.000002),
            "gpt-3.5-turbo-16k" => (0.000003, 0.000004),
            "gpt-3.5-turbo" | "gpt-3.5-turbo-0125" => (0.0000005, 0.0000015),
            // gpt-4 turbo family
            _ => (0.00001, 0.00003),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoeval_core::MemoryKeyStore;
    use mockito::Matcher;
    use proptest::prelude::*;

    const COMPLETION: &str = r#"{
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4-0613",
        "system_fingerprint": null,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "{\"verdict\": \"yes\"}"},
            "logprobs": null,
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
    }"#;

    fn empty_keys() -> Arc<dyn KeyStore> {
        Arc::new(MemoryKeyStore::new())
    }

    fn azure_keys(endpoint: &str) -> Arc<dyn KeyStore> {
        Arc::new(
            MemoryKeyStore::new()
                .with(KeyValues::UseAzureOpenAI, "YES")
                .with(KeyValues::AzureOpenAIApiKey, "azure-key")
                .with(KeyValues::OpenAIApiVersion, "2024-02-01")
                .with(KeyValues::AzureDeploymentName, "judge")
                .with(KeyValues::AzureOpenAIEndpoint, endpoint),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_gpt4_display_name() {
        let model = GptModel::new(Some("gpt-4"), empty_keys()).unwrap();
        assert_eq!(model.get_model_name(), "gpt-4");
    }

    #[test]
    fn test_default_model() {
        let model = GptModel::new(None, empty_keys()).unwrap();
        assert_eq!(model.get_model_name(), DEFAULT_GPT_MODEL);
    }

    #[test]
    fn test_every_valid_model_accepted() {
        for name in VALID_GPT_MODELS {
            let model = GptModel::new(Some(name), empty_keys()).unwrap();
            assert_eq!(model.get_model_name(), *name);
            assert_eq!(model.resolved_model(), *name);
        }
    }

    #[test]
    fn test_invalid_model_rejected() {
        let err = GptModel::new(Some("not-a-model"), empty_keys())
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.starts_with("Invalid model. Available GPT models: "));
        assert!(message.contains("gpt-4-0125-preview, gpt-4-1106-preview"));
    }

    #[test]
    fn test_azure_overrides_display_name() {
        for name in [Some("gpt-4"), Some("gpt-3.5-turbo"), None] {
            let model = GptModel::new(name, azure_keys("https://example.openai.azure.com"))
                .unwrap();
            assert!(model.should_use_azure_openai());
            assert_eq!(model.get_model_name(), "azure openai");
        }
    }

    #[test]
    fn test_azure_flag_values() {
        let keys = Arc::new(MemoryKeyStore::new().with(KeyValues::UseAzureOpenAI, "no"));
        let model = GptModel::new(Some("gpt-4"), keys).unwrap();
        assert!(!model.should_use_azure_openai());
        assert_eq!(model.get_model_name(), "gpt-4");
    }

    #[test]
    fn test_azure_missing_config() {
        let keys = Arc::new(MemoryKeyStore::new().with(KeyValues::UseAzureOpenAI, "yes"));
        let model = GptModel::new(Some("gpt-4"), keys).unwrap();
        let err = model.load_model().err().unwrap();
        assert!(matches!(
            err,
            ModelError::MissingConfig(KeyValues::AzureOpenAIApiKey)
        ));
    }

    #[test]
    fn test_load_model_selects_backend() {
        let model = GptModel::new(Some("gpt-4"), empty_keys())
            .unwrap()
            .with_api_key("test-key");
        assert!(!model.load_model().unwrap().is_azure());

        let model = GptModel::new(Some("gpt-4"), azure_keys("https://example.openai.azure.com"))
            .unwrap();
        assert!(model.load_model().unwrap().is_azure());
    }

    proptest! {
        #[test]
        fn prop_unknown_models_rejected(name in "\\PC{0,24}") {
            prop_assume!(!VALID_GPT_MODELS.contains(&name.as_str()));
            let err = GptModel::new(Some(name.as_str()), empty_keys()).err();
            match err {
                Some(ModelError::InvalidModel { model, available }) => {
                    prop_assert_eq!(model, name);
                    for valid in VALID_GPT_MODELS {
                        prop_assert!(available.contains(valid));
                    }
                }
                other => prop_assert!(false, "expected InvalidModel, got {:?}", other.map(|e| e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_a_generate_openai() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4",
                "temperature": 0.0
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create_async()
            .await;

        let model = GptModel::new(Some("gpt-4"), empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key")
            .with_options(GenerateOptions::default().temperature(0.0));

        let response = model.a_generate("Is this relevant?").await.unwrap();
        assert_eq!(response.content, "{\"verdict\": \"yes\"}");
        assert_eq!(response.usage.total_tokens, 17);
        assert_eq!(response.model, "gpt-4-0613");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_a_generate_raw_returns_completion() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create_async()
            .await;

        let model = GptModel::new(None, empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key");

        let raw = model.a_generate_raw("hello").await.unwrap();
        assert_eq!(raw.id, "chatcmpl-123");
        assert_eq!(raw.choices.len(), 1);
    }

    #[test]
    fn test_generate_blocking() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create();

        let model = GptModel::new(Some("gpt-3.5-turbo"), empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key");

        let response = model.generate("hello").unwrap();
        assert_eq!(response.content, "{\"verdict\": \"yes\"}");
    }

    #[tokio::test]
    async fn test_a_generate_azure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/judge/chat/completions")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "2024-02-01".into(),
            ))
            .match_header("api-key", "azure-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create_async()
            .await;

        let model = GptModel::new(Some("gpt-4"), azure_keys(&server.url())).unwrap();
        assert_eq!(model.model_name(), "azure openai");

        let response = model.a_generate("hello").await.unwrap();
        assert_eq!(response.content, "{\"verdict\": \"yes\"}");

        mock.assert_async().await;
    }

    const RATE_LIMITED: &str = r#"{"error": {"message": "Rate limit reached for requests", "type": "requests", "param": null, "code": "rate_limit_exceeded"}}"#;

    #[tokio::test]
    async fn test_rate_limit_retried_up_to_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(RATE_LIMITED)
            .expect(3)
            .create_async()
            .await;

        let model = GptModel::new(Some("gpt-4"), empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key")
            .with_retry_policy(fast_retry().with_max_attempts(3));

        let err = model.a_generate("hello").await.unwrap_err();
        assert!(err.is_rate_limit());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_with_retries_disabled() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(RATE_LIMITED)
            .expect(1)
            .create_async()
            .await;

        let model = GptModel::new(Some("gpt-4"), empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key")
            .with_retry_policy(RetryPolicy::none());

        let result =
            tokio::time::timeout(Duration::from_secs(5), model.a_generate("hello")).await;
        let err = result.expect("client kept retrying").unwrap_err();
        assert!(err.is_rate_limit());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error": {"message": "bad request", "type": "invalid_request_error", "param": null, "code": null}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let model = GptModel::new(Some("gpt-4"), empty_keys())
            .unwrap()
            .with_api_base(server.url())
            .with_api_key("test-key")
            .with_retry_policy(fast_retry());

        let err = model.a_generate("hello").await.unwrap_err();
        assert!(matches!(err, ModelError::Api(_)));
        assert!(!err.is_rate_limit());

        mock.assert_async().await;
    }

    #[test]
    fn test_cost_per_token() {
        let model = GptModel::new(Some("gpt-4"), empty_keys()).unwrap();
        assert_eq!(model.cost_per_token(), (0.00003, 0.00006));
    }
}
