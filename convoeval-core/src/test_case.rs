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

//! Test case data model
//!
//! Single-turn [`LLMTestCase`]s carry one input/output exchange plus the
//! optional context a metric may need. A [`ConversationalTestCase`] is an
//! ordered list of those exchanges (turns).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A tool invocation made (or expected) by the system under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arguments the tool was called with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_parameters: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_parameters: None,
            output: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_parameters(mut self, params: serde_json::Value) -> Self {
        self.input_parameters = Some(params);
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// One input/output exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LLMTestCase {
    pub input: String,

    #[serde(default)]
    pub actual_output: Option<String>,

    #[serde(default)]
    pub expected_output: Option<String>,

    /// Ground-truth context
    #[serde(default)]
    pub context: Option<Vec<String>>,

    /// Context retrieved by the system under test (RAG)
    #[serde(default)]
    pub retrieval_context: Option<Vec<String>>,

    #[serde(default)]
    pub tools_called: Option<Vec<ToolCall>>,

    #[serde(default)]
    pub expected_tools: Option<Vec<ToolCall>>,

    #[serde(default)]
    pub name: Option<String>,
}

impl LLMTestCase {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_actual_output(mut self, output: impl Into<String>) -> Self {
        self.actual_output = Some(output.into());
        self
    }

    pub fn with_expected_output(mut self, output: impl Into<String>) -> Self {
        self.expected_output = Some(output.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_retrieval_context(mut self, context: Vec<String>) -> Self {
        self.retrieval_context = Some(context);
        self
    }

    pub fn with_tools_called(mut self, tools: Vec<ToolCall>) -> Self {
        self.tools_called = Some(tools);
        self
    }

    pub fn with_expected_tools(mut self, tools: Vec<ToolCall>) -> Self {
        self.expected_tools = Some(tools);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the field behind `param` holds a usable value.
    ///
    /// Empty strings count as present, empty lists do not.
    pub fn has_param(&self, param: LLMTestCaseParams) -> bool {
        match param {
            LLMTestCaseParams::Input => true,
            LLMTestCaseParams::ActualOutput => self.actual_output.is_some(),
            LLMTestCaseParams::ExpectedOutput => self.expected_output.is_some(),
            LLMTestCaseParams::Context => non_empty(&self.context),
            LLMTestCaseParams::RetrievalContext => non_empty(&self.retrieval_context),
            LLMTestCaseParams::ToolsCalled => non_empty(&self.tools_called),
            LLMTestCaseParams::ExpectedTools => non_empty(&self.expected_tools),
        }
    }
}

fn non_empty<T>(items: &Option<Vec<T>>) -> bool {
    items.as_ref().is_some_and(|v| !v.is_empty())
}

/// A multi-turn conversation between a user and the system under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationalTestCase {
    pub turns: Vec<LLMTestCase>,

    /// Role the chatbot is expected to play (e.g. "A programmer")
    #[serde(default)]
    pub chatbot_role: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

impl ConversationalTestCase {
    /// Create a conversation; fails if `turns` is empty.
    pub fn new(turns: Vec<LLMTestCase>) -> Result<Self> {
        if turns.is_empty() {
            return Err(CoreError::InvalidTestCase(
                "'turns' must not be empty".to_string(),
            ));
        }
        Ok(Self {
            turns,
            chatbot_role: None,
            name: None,
        })
    }

    pub fn with_chatbot_role(mut self, role: impl Into<String>) -> Self {
        self.chatbot_role = Some(role.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseKind {
    Llm,
    Conversational,
}

/// Anything `evaluate` can run metrics against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestCase {
    Llm(LLMTestCase),
    Conversational(ConversationalTestCase),
}

impl TestCase {
    pub fn kind(&self) -> TestCaseKind {
        match self {
            TestCase::Llm(_) => TestCaseKind::Llm,
            TestCase::Conversational(_) => TestCaseKind::Conversational,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TestCase::Llm(tc) => tc.name.as_deref(),
            TestCase::Conversational(tc) => tc.name.as_deref(),
        }
    }

    /// Stable hash of the test case content, used as a cache key component.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        // Serialization of our own types cannot fail; fall back to Debug just in case.
        match serde_json::to_string(self) {
            Ok(json) => json.hash(&mut hasher),
            Err(_) => format!("{:?}", self).hash(&mut hasher),
        }
        hasher.finish()
    }
}

impl From<LLMTestCase> for TestCase {
    fn from(tc: LLMTestCase) -> Self {
        TestCase::Llm(tc)
    }
}

impl From<ConversationalTestCase> for TestCase {
    fn from(tc: ConversationalTestCase) -> Self {
        TestCase::Conversational(tc)
    }
}

/// Fields of an [`LLMTestCase`] a metric can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LLMTestCaseParams {
    Input,
    ActualOutput,
    ExpectedOutput,
    Context,
    RetrievalContext,
    ToolsCalled,
    ExpectedTools,
}

impl LLMTestCaseParams {
    pub fn as_str(&self) -> &'static str {
        match self {
            LLMTestCaseParams::Input => "input",
            LLMTestCaseParams::ActualOutput => "actual_output",
            LLMTestCaseParams::ExpectedOutput => "expected_output",
            LLMTestCaseParams::Context => "context",
            LLMTestCaseParams::RetrievalContext => "retrieval_context",
            LLMTestCaseParams::ToolsCalled => "tools_called",
            LLMTestCaseParams::ExpectedTools => "expected_tools",
        }
    }
}

impl fmt::Display for LLMTestCaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verify `test_case` provides every param in `required`.
///
/// The error lists all missing params in the order they were requested.
pub fn check_llm_test_case_params(
    test_case: &LLMTestCase,
    required: &[LLMTestCaseParams],
    metric_name: &str,
) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|param| !test_case.has_param(**param))
        .map(|param| format!("'{}'", param))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    Err(CoreError::MissingTestCaseParams {
        params: missing.join(", "),
        metric: metric_name.to_string(),
    })
}
