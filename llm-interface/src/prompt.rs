use crate::messages::ToolDefinition;
use serde_json::json;

pub const REFERENCE_TOOL: &str = "get_priority_reference";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a technical staff member of this community. Answer questions concisely and accurately.";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// One line of an ongoing comment thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub author: String,
    pub text: String,
    pub is_bot: bool,
}

/// User turn for both dispatch levels plus the lookup query used when the
/// model calls the reference tool without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub with_tool: String,
    pub direct: String,
    pub default_query: String,
}

pub fn reference_tool() -> ToolDefinition {
    ToolDefinition {
        name: REFERENCE_TOOL.to_string(),
        description: "Return curated reference context from local instruction/docs for the current user question."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_chars": { "type": "integer", "minimum": 500, "maximum": 20000 }
            },
            "required": ["query"]
        }),
    }
}

pub fn question_prompt(subject: &str, body: &str) -> Prompt {
    let question = format!("## Current question\nSubject: {subject}\n\nBody:\n{body}");
    let rule = "\nWrite only the answer to the question above. Do not add a prefix such as 'Answer:'.";

    Prompt {
        with_tool: [reference_hint("then answer"), question.clone(), rule.to_string()]
            .join(SECTION_SEPARATOR),
        direct: [question, rule.to_string()].join(SECTION_SEPARATOR),
        default_query: format!("{subject}\n{}", char_prefix(body, 1200)),
    }
}

pub fn followup_prompt(
    subject: &str,
    body: &str,
    transcript: &[TranscriptEntry],
    commenter: &str,
    comment: &str,
) -> Prompt {
    let mut shared = vec![format!(
        "## Original post\nSubject: {subject}\n\nBody:\n{}",
        char_prefix(body, 1000)
    )];

    if !transcript.is_empty() {
        let lines = transcript
            .iter()
            .map(|entry| {
                let role = if entry.is_bot { "(bot)" } else { "(asker)" };
                format!("{} {}: {}", entry.author, role, entry.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        shared.push(format!("## Conversation so far\n{lines}"));
    }

    shared.push(format!("## New comment (needs a reply)\n{commenter}: {comment}"));
    shared.push(
        "\nReply to the comment above. Reflect the earlier conversation and do not add a prefix."
            .to_string(),
    );

    let mut with_tool = vec![reference_hint("if needed")];
    with_tool.extend(shared.iter().cloned());

    Prompt {
        with_tool: with_tool.join(SECTION_SEPARATOR),
        direct: shared.join(SECTION_SEPARATOR),
        default_query: format!("{subject}\n{comment}\n{}", char_prefix(body, 900)),
    }
}

fn reference_hint(tail: &str) -> String {
    format!("## Reference material\nCall the `{REFERENCE_TOOL}` tool to check reference context, {tail}.")
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
