//! Instruction/response prompt rendering.
//!
//! Every turn renders as one block:
//!
//! ```text
//! \n\n### Instruction:\n{query}\n\n### Response:\n{response}
//! ```
//!
//! The pending turn is rendered last with an empty response slot so the model
//! continues directly into its answer. The output is the exact model input, so
//! it must stay byte-stable.

use serde::{Deserialize, Serialize};

const INSTRUCTION_HEADER: &str = "\n\n### Instruction:\n";
const RESPONSE_HEADER: &str = "\n\n### Response:\n";

/// One completed exchange: `(query, response)`.
///
/// Serializes as a two-element JSON array, which is how clients send history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn(pub String, pub String);

impl Turn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self(query.into(), response.into())
    }

    pub fn query(&self) -> &str {
        &self.0
    }

    pub fn response(&self) -> &str {
        &self.1
    }
}

/// Chronological list of prior turns, rebuilt by the caller on every request.
pub type History = Vec<Turn>;

/// Render the model prompt for `query` given the prior `history`.
///
/// Leading and trailing newlines around `query` are treated as formatting
/// noise and removed; historical turns are rendered verbatim.
pub fn build_prompt(query: &str, history: &[Turn]) -> String {
    let query = query.trim_matches('\n');
    let mut s = String::new();
    for turn in history {
        push_block(&mut s, turn.query(), turn.response());
    }
    push_block(&mut s, query, "");
    s
}

/// Number of instruction/response blocks in a rendered prompt.
pub fn count_blocks(prompt: &str) -> usize {
    prompt.matches(INSTRUCTION_HEADER).count()
}

fn push_block(s: &mut String, query: &str, response: &str) {
    s.push_str(INSTRUCTION_HEADER);
    s.push_str(query);
    s.push_str(RESPONSE_HEADER);
    s.push_str(response);
}
