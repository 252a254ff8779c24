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

//! Prompts for the conversation relevancy judge

/// Builds the instructions sent to the judge model.
pub struct ConversationRelevancyTemplate;

impl ConversationRelevancyTemplate {
    /// Prompt asking whether the last `actual_output` in `sliding_window`
    /// is relevant to the last `input`.
    ///
    /// `sliding_window` is embedded as-is; callers render it as a JSON array
    /// of `{"input", "actual_output"}` objects.
    pub fn generate_verdicts(sliding_window: &str) -> String {
        format!(
            r#"Based on the given list of message exchanges between a user and an LLM, generate a JSON object to indicate whether the LAST `actual_output` is relevant to the LAST `input` in messages. The JSON will have 2 fields: 'verdict' and 'reason'.
The 'verdict' key should STRICTLY be either 'yes' or 'no', which states whether the last `actual output` is relevant to the last `input`.
Provide a 'reason' ONLY if the answer is 'no'.
You MUST USE the previous messages (if any) provided in the list of messages to make an informed judgement on relevancy.

**
IMPORTANT: Please make sure to only return in JSON format. And make sure to escape double quotes and single quotes in the json values.
Example Messages:
[
    {{
        "input": "Hi! I have something I want to tell you",
        "actual_output": "Sure, what is it?"
    }},
    {{
        "input": "I've a sore throat, what meds should I take?",
        "actual_output": "I'm sorry but I'm not qualified to answer this question"
    }},
    {{
        "input": "Not even if you're the only one that can help me?",
        "actual_output": "Isn't it a nice day today."
    }}
]

Example JSON:
{{
    "verdict": "no",
    "reason": "The LLM responded 'isn't it a nice day today' to a message that asked about how to treat a sore throat, which is completely irrelevant."
}}
===== END OF EXAMPLE ======
You MUST ONLY provide a verdict for the LAST message on the list but MUST USE context from the previous messages.
You DON'T have to provide a reason if the answer is 'yes'.
ONLY provide a 'no' answer if the LLM response is COMPLETELY irrelevant to the message input.
Vague LLM responses to vague inputs, such as greetings DOES NOT count as irrelevancies!
**

Messages:
{sliding_window}

JSON:
"#,
            sliding_window = sliding_window
        )
    }

    /// Prompt asking the judge to justify `score` from the collected
    /// irrelevancy explanations.
    pub fn generate_reason(score: f64, irrelevancies: &[String]) -> String {
        let irrelevancies =
            serde_json::to_string_pretty(irrelevancies).unwrap_or_else(|_| "[]".to_string());

        format!(
            r#"Below is a list of irrelevancies drawn from some messages in a conversation, which you have minimal knowledge of. It is a list of strings explaining why the 'actual_output' is irrelevant to the `input` for a particular message.
Given the relevancy score, which is a 0-1 score indicating how irrelevant the OVERALL `actual_output`s are to the `inputs` in a conversation (higher the better), CONCISELY summarize the irrelevancies to justify the score.

**
IMPORTANT: Please make sure to only return in JSON format, with the 'reason' key providing the reason. And make sure to escape double quotes and single quotes in the json values.
Example JSON:
{{
    "reason": "The score is <relevancy_score> because <your_reason>."
}}

Always quote WHICH MESSAGE and the INFORMATION in the reason in your final reason.
Be sure in your reason, as if you know what the `actual_output`s from messages in a conversation is from the irrelevancies.
**

Relevancy Score:
{score:?}

Irrelevancies:
{irrelevancies}

JSON:
"#,
            score = score,
            irrelevancies = irrelevancies
        )
    }
}
