//! Prompt construction
//!
//! Renders the current question together with the caller's transcript into
//! the single text prompt both backends receive.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

const PREAMBLE: &str = "Answer the following query. Take history into consideration.";

/// Placeholder written in place of an empty transcript
const EMPTY_HISTORY: &str = "(none)";

/// Indentation for the continuation lines of a multi-line turn
const CONTINUATION_INDENT: &str = "    ";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Ai,
    Human,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Ai => "AI",
            Role::Human => "Human",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of the conversation transcript. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Render a single turn as `[n] Role: text`.
///
/// Continuation lines are indented so a line inside a turn can never be
/// mistaken for the start of the next one.
pub fn render_turn(position: usize, turn: &ConversationTurn) -> String {
    let mut rendered = format!("[{position}] {}: ", turn.role);
    for (i, line) in turn.content.split('\n').enumerate() {
        if i > 0 {
            rendered.push('\n');
            rendered.push_str(CONTINUATION_INDENT);
        }
        rendered.push_str(line);
    }
    rendered
}

/// Render the transcript, oldest turn first
pub fn render_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return EMPTY_HISTORY.to_string();
    }

    history
        .iter()
        .enumerate()
        .map(|(i, turn)| render_turn(i + 1, turn))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the prompt for one exchange. Pure: no I/O, same input, same output.
pub fn build_prompt(question: &str, history: &[ConversationTurn]) -> String {
    let mut prompt = String::with_capacity(PREAMBLE.len() + question.len() + 64);
    prompt.push_str(PREAMBLE);
    // Writing into a String cannot fail
    let _ = write!(prompt, "\nQuestion: {question}\nHistory:");
    if history.is_empty() {
        let _ = write!(prompt, " {EMPTY_HISTORY}");
    } else {
        prompt.push('\n');
        prompt.push_str(&render_history(history));
    }
    prompt
}
