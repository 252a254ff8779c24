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

//! Test case loading for the `run` command

use anyhow::{Context, Result};
use convoeval_core::{ConversationalTestCase, LLMTestCase, TestCase};
use serde::Deserialize;
use std::path::Path;

/// Layout of a `--cases` TOML file
///
/// ```toml
/// [[conversations]]
/// chatbot_role = "A programmer"
///
/// [[conversations.turns]]
/// input = "Message input"
/// actual_output = "Message actual output"
///
/// [[cases]]
/// input = "Message input number 1!"
/// actual_output = "Message actual output number 1..."
/// retrieval_context = ["I love dogs"]
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CasesFile {
    #[serde(default)]
    pub conversations: Vec<ConversationEntry>,
    #[serde(default)]
    pub cases: Vec<LLMTestCase>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationEntry {
    pub name: Option<String>,
    pub chatbot_role: Option<String>,
    pub turns: Vec<LLMTestCase>,
}

impl CasesFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid cases file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Conversations first, then single-turn cases.
    pub fn into_test_cases(self) -> Result<Vec<TestCase>> {
        let mut test_cases = Vec::with_capacity(self.conversations.len() + self.cases.len());

        for (i, entry) in self.conversations.into_iter().enumerate() {
            let mut convo = ConversationalTestCase::new(entry.turns)
                .with_context(|| format!("conversation #{}", i + 1))?;
            if let Some(role) = entry.chatbot_role {
                convo = convo.with_chatbot_role(role);
            }
            if let Some(name) = entry.name {
                convo = convo.with_name(name);
            }
            test_cases.push(convo.into());
        }

        test_cases.extend(self.cases.into_iter().map(TestCase::from));
        Ok(test_cases)
    }
}

/// Two one-turn conversations, the first with a chatbot role.
pub fn demo_cases() -> Result<Vec<TestCase>> {
    let turn = || LLMTestCase::new("Message input").with_actual_output("Message actual output");

    Ok(vec![
        ConversationalTestCase::new(vec![turn()])?
            .with_chatbot_role("A programmer")
            .into(),
        ConversationalTestCase::new(vec![turn()])?.into(),
    ])
}
