//! Builds the instruction payload handed to the conversational engine at session start.

use crate::lesson::{DIGEST_MARKER, VOCABULARY_MARKER};

pub const VOCABULARY_HEADING: &str = "VOCABULARY FOCUS";
pub const DIGEST_HEADING: &str = "TODAY'S CONTENT (NEWS DIGEST)";

/// Appends the optional vocabulary and digest blocks to the persona instructions.
///
/// Empty blocks are omitted entirely, so `compose(p, "", "") == p`.
pub fn compose(persona: &str, vocabulary_focus: &str, digest: &str) -> String {
    let mut instructions = persona.to_string();

    let vocabulary = strip_markers(vocabulary_focus);
    if !vocabulary.is_empty() {
        instructions.push_str(&format!(
            "\n\n## {VOCABULARY_HEADING}\nWeave these words into the conversation and check that the student can use them:\n{vocabulary}"
        ));
    }

    let digest = strip_markers(digest);
    if !digest.is_empty() {
        instructions.push_str(&format!(
            "\n\n## {DIGEST_HEADING}\nDiscuss the following material with the student:\n{digest}"
        ));
    }

    instructions
}

/// Drops lines that consist solely of a section marker.
fn strip_markers(block: &str) -> String {
    block
        .lines()
        .filter(|line| {
            let line = line.trim();
            line != DIGEST_MARKER && !line.eq_ignore_ascii_case(VOCABULARY_MARKER)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
