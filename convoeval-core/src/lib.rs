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

//! ConvoEval Core
//!
//! Test case model, configuration key store and retry primitives shared by
//! the evaluation crates.

pub mod error;
pub mod key_handler;
pub mod resilience;
pub mod test_case;

pub use error::{CoreError, Result};
pub use key_handler::{KeyFileHandler, KeyStore, KeyValues, MemoryKeyStore, KEY_FILE};
pub use resilience::{retry_with_exponential_backoff, RetryPolicy};
pub use test_case::{
    check_llm_test_case_params, ConversationalTestCase, LLMTestCase, LLMTestCaseParams, TestCase,
    TestCaseKind, ToolCall,
};
